use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use crmdesk::api_router::build_app;
use crmdesk::channels::twilio_sms::{SentSms, SmsTransport, TwilioError, TwilioPhoneNumber};
use crmdesk::contacts::types::Contact;
use crmdesk::conversations::types::{Conversation, MessageStatus};
use crmdesk::core::auth::{Credentials, StaticAuthBackend};
use crmdesk::core::config::{AppConfig, OwnedNumber};
use crmdesk::core::state::AppState;
use crmdesk::crm::MemoryCrmBackend;
use crmdesk::llm::{AgentBackend, AgentError, AgentReply, AgentSettings, ChatTurn};
use crmdesk::pipelines::types::{Opportunity, OpportunityStatus, Pipeline, Stage};

const TOKEN: &str = "token-biz-1";
const OTHER_TOKEN: &str = "token-biz-2";

struct TestTransport {
    failures: AtomicUsize,
    sent: AtomicUsize,
}

#[async_trait]
impl SmsTransport for TestTransport {
    async fn send_sms(&self, _from: &str, _to: &str, _body: &str) -> Result<SentSms, TwilioError> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(TwilioError::NetworkError("connection reset".to_string()));
        }
        let n = self.sent.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SentSms {
            sid: format!("SM{n}"),
            status: MessageStatus::Queued,
        })
    }

    async fn get_phone_numbers(&self) -> Result<Vec<TwilioPhoneNumber>, TwilioError> {
        Ok(Vec::new())
    }
}

struct EchoAgent;

#[async_trait]
impl AgentBackend for EchoAgent {
    async fn reply(
        &self,
        system_prompt: &str,
        conversation: &[ChatTurn],
        _settings: &AgentSettings,
    ) -> Result<AgentReply, AgentError> {
        let last = conversation.last().map(|t| t.content.clone()).unwrap_or_default();
        Ok(AgentReply {
            message: format!("[{system_prompt}] {last}"),
            is_human_escalation_needed: Some(false),
            is_dnd: Some(last.to_lowercase().contains("stop")),
        })
    }
}

fn credentials(business_id: &str) -> Credentials {
    Credentials {
        user_id: format!("user-{business_id}"),
        business_id: business_id.to_string(),
        display_name: "Dana Reyes".to_string(),
    }
}

fn contact(id: &str, business_id: &str, first_name: &str, phone: &str) -> Contact {
    Contact {
        id: id.to_string(),
        business_id: business_id.to_string(),
        first_name: Some(first_name.to_string()),
        last_name: None,
        email: None,
        phone: Some(phone.to_string()),
        additional_emails: Vec::new(),
        additional_phones: Vec::new(),
        tags: Vec::new(),
        dnd: false,
        dnd_settings: None,
        source: None,
        date_added: None,
        date_updated: None,
    }
}

fn pipeline() -> Pipeline {
    Pipeline {
        id: "pipe-1".to_string(),
        name: "Sales".to_string(),
        stages: vec![
            Stage {
                id: "stage-new".to_string(),
                name: "New".to_string(),
                position: 0,
            },
            Stage {
                id: "stage-won".to_string(),
                name: "Closed".to_string(),
                position: 1,
            },
        ],
    }
}

fn opportunity(id: &str, value: f64) -> Opportunity {
    Opportunity {
        id: id.to_string(),
        name: format!("Deal {id}"),
        monetary_value: value,
        source: Some("website".to_string()),
        pipeline_id: "pipe-1".to_string(),
        pipeline_stage_id: "stage-new".to_string(),
        contact_id: None,
        status: OpportunityStatus::Open,
    }
}

struct TestApp {
    app: Router,
    crm: Arc<MemoryCrmBackend>,
    _prompt_dir: tempfile::TempDir,
}

async fn setup(send_failures: usize) -> TestApp {
    setup_with(send_failures, |_| {}).await
}

async fn setup_with(send_failures: usize, configure: impl FnOnce(&mut AppConfig)) -> TestApp {
    let prompt_dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.agent.prompt_path = prompt_dir.path().join("prompt.txt");
    config.twilio.numbers = vec![OwnedNumber {
        phone_number: "+15550001111".to_string(),
        business_id: "biz-1".to_string(),
        friendly_name: Some("Front desk".to_string()),
    }];
    configure(&mut config);

    let crm = Arc::new(MemoryCrmBackend::new());
    crm.insert_contact(contact("c-1", "biz-1", "Ana", "+15552223333"))
        .await;
    crm.insert_contact(contact("c-9", "biz-2", "Bo", "+15559998888"))
        .await;
    crm.insert_pipeline("biz-1", pipeline()).await;
    crm.insert_opportunity("biz-1", opportunity("opp-1", 1000.0))
        .await;
    crm.insert_opportunity("biz-1", opportunity("opp-2", 250.0))
        .await;
    crm.insert_conversation(Conversation {
        id: "conv-1".to_string(),
        contact_id: "c-1".to_string(),
        business_id: "biz-1".to_string(),
        full_name: Some("Ana".to_string()),
        phone: Some("+15552223333".to_string()),
        alternate_phones: Vec::new(),
        email: None,
        last_message_type: None,
    })
    .await;

    let auth = StaticAuthBackend::new()
        .with_token(TOKEN, credentials("biz-1"))
        .with_token(OTHER_TOKEN, credentials("biz-2"));
    let transport = Arc::new(TestTransport {
        failures: AtomicUsize::new(send_failures),
        sent: AtomicUsize::new(0),
    });

    let state = AppState::new(
        config,
        crm.clone(),
        Arc::new(auth),
        transport,
        Arc::new(EchoAgent),
        CancellationToken::new(),
    );

    TestApp {
        app: build_app(Arc::new(state)),
        crm,
        _prompt_dir: prompt_dir,
    }
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn post_form(app: &Router, uri: &str, form: &str) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let t = setup(0).await;
    let (status, body) = call(&t.app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_missing_and_invalid_tokens() {
    let t = setup(0).await;

    let (status, body) = call(&t.app, "GET", "/api/contacts", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = call(&t.app, "GET", "/api/contacts", Some("nope"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_contacts_are_scoped_by_business() {
    let t = setup(0).await;

    let (status, body) = call(&t.app, "GET", "/api/contacts", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["total"], 1);
    assert_eq!(body["contacts"][0]["id"], "c-1");

    let (status, body) = call(&t.app, "GET", "/api/contacts/c-1", Some(OTHER_TOKEN), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_create_contact_validation_and_cache_invalidation() {
    let t = setup(0).await;

    let (status, _) = call(&t.app, "GET", "/api/contacts", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/contacts",
        Some(TOKEN),
        Some(json!({"firstName": "Lee"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/contacts",
        Some(TOKEN),
        Some(json!({"firstName": "Lee", "email": "lee@example.com"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contact"]["email"], "lee@example.com");

    let (_, body) = call(&t.app, "GET", "/api/contacts", Some(TOKEN), None).await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn test_dnd_toggle_initializes_and_sets_aggregate() {
    let t = setup(0).await;

    let (status, body) = call(
        &t.app,
        "PUT",
        "/api/contacts/c-1/dnd",
        Some(TOKEN),
        Some(json!({"channel": "SMS"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contact"]["dnd"], true);
    assert_eq!(body["contact"]["dndSettings"]["SMS"]["status"], "active");
    assert_eq!(body["contact"]["dndSettings"]["Email"]["status"], "inactive");

    let (_, body) = call(
        &t.app,
        "PUT",
        "/api/contacts/c-1/dnd",
        Some(TOKEN),
        Some(json!({"channel": "SMS", "status": "inactive"})),
    )
    .await;
    assert_eq!(body["contact"]["dnd"], false);

    let (status, _) = call(
        &t.app,
        "PUT",
        "/api/contacts/c-1/dnd",
        Some(TOKEN),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_notes_require_body() {
    let t = setup(0).await;

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/contacts/c-1/notes",
        Some(TOKEN),
        Some(json!({"body": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/contacts/c-1/notes",
        Some(TOKEN),
        Some(json!({"body": "Called back, wants a quote"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let note_id = body["note"]["id"].as_str().unwrap().to_string();

    let (_, body) = call(&t.app, "GET", "/api/contacts/c-1/notes", Some(TOKEN), None).await;
    assert_eq!(body["notes"].as_array().unwrap().len(), 1);

    let (status, _) = call(
        &t.app,
        "DELETE",
        &format!("/api/contacts/c-1/notes/{note_id}"),
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_import_preview_and_submit() {
    let t = setup(0).await;
    let csv = "First Name,Email,Phone\nAna,ana@example.com,\nBo,,+15550009999\nNobody,,\n";

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/contacts/import/preview",
        Some(TOKEN),
        Some(json!({"csv": csv})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["inputRows"], 3);
    assert_eq!(body["validRows"], 2);
    assert_eq!(body["droppedRows"], 1);
    assert_eq!(body["mapping"]["Email"], "email");

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/contacts/import",
        Some(TOKEN),
        Some(json!({"csv": csv, "pipelineId": "pipe-1", "consent": false})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/contacts/import",
        Some(TOKEN),
        Some(json!({"csv": csv, "pipelineId": "pipe-1", "consent": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["created"], 2);
    assert_eq!(body["droppedRows"], 1);

    let (_, body) = call(&t.app, "GET", "/api/contacts?forceRefresh=true", Some(TOKEN), None).await;
    assert_eq!(body["total"], 3);
}

#[tokio::test]
async fn test_pipeline_board_move_and_dashboard() {
    let t = setup(0).await;

    let (status, body) = call(&t.app, "GET", "/api/pipelines", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pipelines"][0]["id"], "pipe-1");

    let (_, body) = call(
        &t.app,
        "GET",
        "/api/pipelines/pipe-1/opportunities",
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(body["stages"][0]["count"], 2);
    assert_eq!(body["stages"][1]["count"], 0);

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/opportunities/opp-1/move",
        Some(TOKEN),
        Some(json!({"actionType": "drag"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/opportunities/opp-1/move",
        Some(TOKEN),
        Some(json!({"stageId": "stage-nowhere"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/opportunities/opp-1/move",
        Some(TOKEN),
        Some(json!({"stageId": "stage-won", "actionType": "drag"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["opportunity"]["pipelineStageId"], "stage-won");

    let (_, body) = call(
        &t.app,
        "GET",
        "/api/pipelines/pipe-1/opportunities",
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(body["stages"][0]["count"], 1);
    assert_eq!(body["stages"][1]["count"], 1);
    assert_eq!(body["stages"][1]["totalValue"], 1000.0);

    let (_, body) = call(&t.app, "GET", "/api/dashboard", Some(TOKEN), None).await;
    assert_eq!(body["openOpportunities"], 2);
    assert_eq!(body["openValue"], 1250.0);

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/opportunities/opp-404/move",
        Some(TOKEN),
        Some(json!({"stageId": "stage-won"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_board_and_dashboard_survive_deleted_stage() {
    let t = setup(0).await;
    let mut stale = opportunity("opp-3", 75.0);
    stale.pipeline_stage_id = "stage-deleted".to_string();
    t.crm.insert_opportunity("biz-1", stale).await;

    let (status, body) = call(
        &t.app,
        "GET",
        "/api/pipelines/pipe-1/opportunities",
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stages"][0]["count"], 2);
    assert_eq!(body["unassigned"][0]["id"], "opp-3");

    let (status, body) = call(&t.app, "GET", "/api/dashboard", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["openOpportunities"], 3);
    assert_eq!(body["openValue"], 1325.0);

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/opportunities/opp-3/move",
        Some(TOKEN),
        Some(json!({"stageId": "stage-new"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["opportunity"]["pipelineStageId"], "stage-new");
}

#[tokio::test]
async fn test_send_requires_matching_business() {
    let t = setup(0).await;

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/conversations/conv-1/send",
        Some(TOKEN),
        Some(json!({"message": "hi"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/conversations/conv-1/send",
        Some(TOKEN),
        Some(json!({"message": "hi", "businessId": "biz-2"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/conversations/conv-1/send",
        Some(TOKEN),
        Some(json!({"message": "  ", "businessId": "biz-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_send_then_list_messages() {
    let t = setup(0).await;

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/conversations/conv-1/send",
        Some(TOKEN),
        Some(json!({"message": "Your table is ready", "businessId": "biz-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"]["id"]["state"], "confirmed");
    assert_eq!(body["message"]["id"]["id"], "SM1");

    let stored = t.crm.messages("biz-1", "conv-1").await;
    assert_eq!(stored.len(), 1);

    let (status, body) = call(
        &t.app,
        "GET",
        "/api/conversations/conv-1/messages?refresh=true",
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["render"]["kind"], "text");
    assert_eq!(body["hasMore"], false);
}

#[tokio::test]
async fn test_failed_send_can_be_retried_once() {
    let t = setup(1).await;

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/conversations/conv-1/send",
        Some(TOKEN),
        Some(json!({"message": "See you at 6", "businessId": "biz-1"})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    let client_id = body["clientId"].as_str().unwrap().to_string();

    let (status, body) = call(
        &t.app,
        "POST",
        &format!("/api/conversations/conv-1/messages/{client_id}/retry"),
        Some(TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clientId"], client_id.as_str());

    let (_, body) = call(
        &t.app,
        "GET",
        "/api/conversations/conv-1/messages",
        Some(TOKEN),
        None,
    )
    .await;
    let messages = body["messages"].as_array().unwrap();
    let matching = messages
        .iter()
        .filter(|m| m["body"] == "See you at 6")
        .count();
    assert_eq!(matching, 1);
}

#[tokio::test]
async fn test_conversation_of_other_business_is_not_found() {
    let t = setup(0).await;
    let (status, _) = call(
        &t.app,
        "GET",
        "/api/conversations/conv-1/messages",
        Some(OTHER_TOKEN),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_inbound_and_status_paths() {
    let t = setup(0).await;

    let (status, body) = post_form(
        &t.app,
        "/api/twilio/webhook",
        "MessageSid=SM900&From=%2B15552223333&To=%2B15550001111&Body=Running+late",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "inbound");
    assert_eq!(body["routed"], true);
    assert_eq!(body["result"]["conversationId"], "conv-1");

    let stored = t.crm.messages("biz-1", "conv-1").await;
    assert!(stored.iter().any(|m| m.body.as_deref() == Some("Running late")));

    let (status, body) = post_form(
        &t.app,
        "/api/twilio/webhook",
        "MessageSid=SM1&MessageStatus=delivered&From=%2B15550001111&To=%2B15552223333",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "status");

    let (status, body) = post_form(&t.app, "/api/twilio/webhook", "MessageStatus=delivered").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);

    let (status, _) = post_form(&t.app, "/api/twilio/webhook", "MessageSid=SM2&From=%2B1555").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_webhook_with_status_and_body_takes_status_path() {
    let t = setup(0).await;
    let before = t.crm.messages("biz-1", "conv-1").await.len();

    let (status, body) = post_form(
        &t.app,
        "/api/twilio/webhook",
        "MessageSid=SM77&MessageStatus=delivered&Body=Ghost+text&From=%2B15550001111&To=%2B15552223333",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "status");
    assert_eq!(body["messageSid"], "SM77");

    let stored = t.crm.messages("biz-1", "conv-1").await;
    assert_eq!(stored.len(), before);
    assert!(stored.iter().all(|m| m.body.as_deref() != Some("Ghost text")));
}

#[tokio::test]
async fn test_unsigned_webhook_is_rejected_once_account_is_set() {
    let t = setup_with(0, |config| {
        config.twilio.account_sid = "AC123".to_string();
        config.twilio.auth_token = "secret".to_string();
        config.twilio.webhook_url = Some("https://crm.test/api/twilio/webhook".to_string());
    })
    .await;

    let (status, body) = post_form(
        &t.app,
        "/api/twilio/webhook",
        "MessageSid=SM902&From=%2B15552223333&To=%2B15550001111&Body=forged",
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let stored = t.crm.messages("biz-1", "conv-1").await;
    assert!(stored.iter().all(|m| m.body.as_deref() != Some("forged")));
}

#[tokio::test]
async fn test_inbound_to_unowned_number_is_unrouted() {
    let t = setup(0).await;
    let (status, body) = post_form(
        &t.app,
        "/api/twilio/webhook",
        "MessageSid=SM901&From=%2B15552223333&To=%2B15557770000&Body=hello",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["routed"], false);
}

#[tokio::test]
async fn test_numbers_listing_and_selection() {
    let t = setup(0).await;

    let (status, body) = call(&t.app, "GET", "/api/twilio/numbers", Some(TOKEN), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["numbers"][0]["phoneNumber"], "+15550001111");
    assert_eq!(body["numbers"][0]["selected"], true);

    let (status, _) = call(
        &t.app,
        "PUT",
        "/api/twilio/numbers/selected",
        Some(TOKEN),
        Some(json!({"phoneNumber": "+15551234567"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &t.app,
        "PUT",
        "/api/twilio/numbers/selected",
        Some(TOKEN),
        Some(json!({"phoneNumber": "+15550001111"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phoneNumber"], "+15550001111");
}

#[tokio::test]
async fn test_agent_chat_and_prompt_editor() {
    let t = setup(0).await;

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/chatai",
        Some(TOKEN),
        Some(json!({"config": {}})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/ai-agent/test/editor",
        Some(TOKEN),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &t.app,
        "POST",
        "/api/ai-agent/test/editor",
        Some(TOKEN),
        Some(json!({"content": "Be brief."})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&t.app, "GET", "/api/ai-agent/test/editor", Some(TOKEN), None).await;
    assert_eq!(body["content"], "Be brief.");

    let (status, body) = call(
        &t.app,
        "POST",
        "/api/chatai",
        Some(TOKEN),
        Some(json!({
            "conversation": [{"role": "user", "content": "Please stop"}],
            "config": {}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "[Be brief.] Please stop");
    assert_eq!(body["isDND"], true);
}
