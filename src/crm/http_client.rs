use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{CrmBackend, CrmError};
use crate::contacts::import::BulkContactBatch;
use crate::contacts::types::{Contact, ContactPage, CreateContactRequest, Note};
use crate::conversations::types::{
    CallDetail, Conversation, Direction, EmailDetail, Message, MessagePage, MessageStatus,
    MessageType, RawMessage,
};
use crate::core::config::CrmConfig;
use crate::pipelines::types::{Opportunity, Pipeline};

/// REST client for a LeadConnector-style CRM API.
///
/// Each endpoint decodes into exactly one response type below; a body that
/// does not match is reported as [`CrmError::Schema`].
pub struct HttpCrmBackend {
    http_client: Client,
    base_url: String,
    api_key: String,
    api_version: String,
}

#[derive(Debug, Deserialize)]
struct ContactListResponse {
    contacts: Vec<Contact>,
    meta: ListMeta,
}

#[derive(Debug, Deserialize)]
struct ListMeta {
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ContactEnvelope {
    contact: Contact,
}

#[derive(Debug, Deserialize)]
struct NotesResponse {
    notes: Vec<Note>,
}

#[derive(Debug, Deserialize)]
struct NoteEnvelope {
    note: Note,
}

#[derive(Debug, Deserialize)]
struct PipelinesResponse {
    pipelines: Vec<Pipeline>,
}

#[derive(Debug, Deserialize)]
struct OpportunitiesResponse {
    opportunities: Vec<Opportunity>,
    #[serde(default)]
    meta: Option<SearchMeta>,
}

/// Cursor of the opportunity search; absent `nextPage` means the last page.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchMeta {
    #[serde(default)]
    next_page: Option<u32>,
    #[serde(default)]
    start_after: Option<serde_json::Value>,
    #[serde(default)]
    start_after_id: Option<String>,
}

const OPPORTUNITY_PAGE_LIMIT: u32 = 100;
const MAX_OPPORTUNITY_PAGES: u32 = 500;

#[derive(Debug, Deserialize)]
struct OpportunityEnvelope {
    opportunity: Opportunity,
}

#[derive(Debug, Deserialize)]
struct ConversationEnvelope {
    conversation: Conversation,
}

#[derive(Debug, Deserialize)]
struct ConversationSearchResponse {
    conversations: Vec<Conversation>,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: MessagesBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesBody {
    #[serde(default)]
    last_message_id: Option<String>,
    #[serde(default)]
    next_page: bool,
    messages: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageResponse {
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct EmailEnvelope {
    email: EmailDetail,
}

#[derive(Debug, Deserialize)]
struct CallEnvelope {
    call: CallDetail,
}

#[derive(Debug, Deserialize)]
struct BulkCreateResponse {
    created: usize,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateContactBody<'a> {
    location_id: &'a str,
    #[serde(flatten)]
    request: &'a CreateContactRequest,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkCreateBody<'a> {
    location_id: &'a str,
    #[serde(flatten)]
    batch: &'a BulkContactBatch,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NoteBody<'a> {
    body: &'a str,
    user_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MoveOpportunityBody<'a> {
    pipeline_stage_id: &'a str,
    action_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordMessageBody<'a> {
    #[serde(rename = "type")]
    message_type: String,
    conversation_id: &'a str,
    location_id: &'a str,
    alt_id: &'a str,
    message: Option<&'a str>,
    status: &'a str,
    date: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody<'a> {
    status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailBody<'a> {
    #[serde(rename = "type")]
    message_type: &'a str,
    conversation_id: &'a str,
    location_id: &'a str,
    email_to: &'a str,
    html: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateConversationBody<'a> {
    location_id: &'a str,
    phone: &'a str,
}

impl HttpCrmBackend {
    pub fn new(config: &CrmConfig) -> Result<Self, CrmError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CrmError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            api_version: config.api_version.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http_client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("Version", &self.api_version)
            .header("Accept", "application/json")
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<reqwest::Response, CrmError> {
        let response = builder
            .send()
            .await
            .map_err(|e| CrmError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ApiErrorBody>()
            .await
            .ok()
            .and_then(|body| body.message)
            .map(|value| match value {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .unwrap_or_else(|| status.to_string());

        debug!("CRM call for {what} returned {status}: {message}");

        match status {
            StatusCode::NOT_FOUND => Err(CrmError::NotFound(what.to_string())),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(CrmError::InvalidInput(message))
            }
            _ => Err(CrmError::Api {
                status: status.as_u16(),
                message,
            }),
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        what: &str,
    ) -> Result<T, CrmError> {
        let response = self.execute(builder, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| CrmError::Schema(format!("{what}: {e}")))
    }
}

#[async_trait]
impl CrmBackend for HttpCrmBackend {
    async fn list_contacts(
        &self,
        business_id: &str,
        page: u32,
        limit: u32,
        tag: Option<&str>,
    ) -> Result<ContactPage, CrmError> {
        let mut query = vec![
            ("locationId", business_id.to_string()),
            ("page", page.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(tag) = tag {
            query.push(("tag", tag.to_string()));
        }

        let list: ContactListResponse = self
            .fetch(self.request(Method::GET, "/contacts/").query(&query), "contacts")
            .await?;

        Ok(ContactPage {
            contacts: list.contacts,
            total: list.meta.total,
        })
    }

    async fn get_contact(&self, business_id: &str, contact_id: &str) -> Result<Contact, CrmError> {
        let envelope: ContactEnvelope = self
            .fetch(
                self.request(Method::GET, &format!("/contacts/{contact_id}"))
                    .query(&[("locationId", business_id)]),
                &format!("contact {contact_id}"),
            )
            .await?;

        // The API answers for any location the key can see.
        if envelope.contact.business_id != business_id {
            return Err(CrmError::NotFound(format!("contact {contact_id}")));
        }
        Ok(envelope.contact)
    }

    async fn create_contact(
        &self,
        business_id: &str,
        request: &CreateContactRequest,
    ) -> Result<Contact, CrmError> {
        let body = CreateContactBody {
            location_id: business_id,
            request,
        };
        let envelope: ContactEnvelope = self
            .fetch(self.request(Method::POST, "/contacts/").json(&body), "contact")
            .await?;
        Ok(envelope.contact)
    }

    async fn update_contact(
        &self,
        business_id: &str,
        contact: &Contact,
    ) -> Result<Contact, CrmError> {
        if contact.business_id != business_id {
            return Err(CrmError::NotFound(format!("contact {}", contact.id)));
        }
        let envelope: ContactEnvelope = self
            .fetch(
                self.request(Method::PUT, &format!("/contacts/{}", contact.id))
                    .query(&[("locationId", business_id)])
                    .json(contact),
                &format!("contact {}", contact.id),
            )
            .await?;
        Ok(envelope.contact)
    }

    async fn delete_contact(&self, business_id: &str, contact_id: &str) -> Result<(), CrmError> {
        self.execute(
            self.request(Method::DELETE, &format!("/contacts/{contact_id}"))
                .query(&[("locationId", business_id)]),
            &format!("contact {contact_id}"),
        )
        .await?;
        Ok(())
    }

    async fn create_contacts_batch(
        &self,
        business_id: &str,
        batch: &BulkContactBatch,
    ) -> Result<usize, CrmError> {
        let body = BulkCreateBody {
            location_id: business_id,
            batch,
        };
        let created: BulkCreateResponse = self
            .fetch(self.request(Method::POST, "/contacts/bulk").json(&body), "contact batch")
            .await?;

        if created.created != batch.contacts.len() {
            warn!(
                "CRM accepted {} of {} imported contacts for {}",
                created.created,
                batch.contacts.len(),
                business_id
            );
        }
        Ok(created.created)
    }

    async fn list_notes(&self, business_id: &str, contact_id: &str) -> Result<Vec<Note>, CrmError> {
        let notes: NotesResponse = self
            .fetch(
                self.request(Method::GET, &format!("/contacts/{contact_id}/notes"))
                    .query(&[("locationId", business_id)]),
                &format!("contact {contact_id}"),
            )
            .await?;
        Ok(notes.notes)
    }

    async fn create_note(
        &self,
        business_id: &str,
        contact_id: &str,
        body: &str,
        user_id: &str,
    ) -> Result<Note, CrmError> {
        let envelope: NoteEnvelope = self
            .fetch(
                self.request(Method::POST, &format!("/contacts/{contact_id}/notes"))
                    .query(&[("locationId", business_id)])
                    .json(&NoteBody { body, user_id }),
                &format!("contact {contact_id}"),
            )
            .await?;
        Ok(envelope.note)
    }

    async fn update_note(
        &self,
        business_id: &str,
        contact_id: &str,
        note_id: &str,
        body: &str,
        user_id: &str,
    ) -> Result<Note, CrmError> {
        let envelope: NoteEnvelope = self
            .fetch(
                self.request(
                    Method::PUT,
                    &format!("/contacts/{contact_id}/notes/{note_id}"),
                )
                .query(&[("locationId", business_id)])
                .json(&NoteBody { body, user_id }),
                &format!("note {note_id}"),
            )
            .await?;
        Ok(envelope.note)
    }

    async fn delete_note(
        &self,
        business_id: &str,
        contact_id: &str,
        note_id: &str,
    ) -> Result<(), CrmError> {
        self.execute(
            self.request(
                Method::DELETE,
                &format!("/contacts/{contact_id}/notes/{note_id}"),
            )
            .query(&[("locationId", business_id)]),
            &format!("note {note_id}"),
        )
        .await?;
        Ok(())
    }

    async fn list_pipelines(&self, business_id: &str) -> Result<Vec<Pipeline>, CrmError> {
        let list: PipelinesResponse = self
            .fetch(
                self.request(Method::GET, "/opportunities/pipelines")
                    .query(&[("locationId", business_id)]),
                "pipelines",
            )
            .await?;
        Ok(list.pipelines)
    }

    /// Follows the search cursor until the last page so board aggregates
    /// see every opportunity of the pipeline.
    async fn list_opportunities(
        &self,
        business_id: &str,
        pipeline_id: &str,
    ) -> Result<Vec<Opportunity>, CrmError> {
        let what = format!("pipeline {pipeline_id}");
        let limit = OPPORTUNITY_PAGE_LIMIT.to_string();
        let mut opportunities = Vec::new();
        let mut cursor = SearchMeta {
            next_page: Some(1),
            ..Default::default()
        };

        for _ in 0..MAX_OPPORTUNITY_PAGES {
            let Some(page) = cursor.next_page else {
                return Ok(opportunities);
            };

            let mut query = vec![
                ("location_id", business_id.to_string()),
                ("pipeline_id", pipeline_id.to_string()),
                ("limit", limit.clone()),
                ("page", page.to_string()),
            ];
            if let Some(start_after) = &cursor.start_after {
                let value = match start_after {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                query.push(("startAfter", value));
            }
            if let Some(start_after_id) = &cursor.start_after_id {
                query.push(("startAfterId", start_after_id.clone()));
            }

            let list: OpportunitiesResponse = self
                .fetch(
                    self.request(Method::GET, "/opportunities/search").query(&query),
                    &what,
                )
                .await?;

            let empty = list.opportunities.is_empty();
            opportunities.extend(list.opportunities);
            cursor = list.meta.unwrap_or_default();
            if empty || cursor.next_page.is_some_and(|next| next <= page) {
                return Ok(opportunities);
            }
        }

        warn!(
            "Stopped paging {what} after {MAX_OPPORTUNITY_PAGES} pages ({} loaded)",
            opportunities.len()
        );
        Ok(opportunities)
    }

    async fn move_opportunity(
        &self,
        business_id: &str,
        opportunity_id: &str,
        stage_id: &str,
        action_type: &str,
    ) -> Result<Opportunity, CrmError> {
        let envelope: OpportunityEnvelope = self
            .fetch(
                self.request(Method::PUT, &format!("/opportunities/{opportunity_id}"))
                    .query(&[("locationId", business_id)])
                    .json(&MoveOpportunityBody {
                        pipeline_stage_id: stage_id,
                        action_type,
                    }),
                &format!("opportunity {opportunity_id}"),
            )
            .await?;
        Ok(envelope.opportunity)
    }

    async fn get_conversation(
        &self,
        business_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, CrmError> {
        let envelope: ConversationEnvelope = self
            .fetch(
                self.request(Method::GET, &format!("/conversations/{conversation_id}"))
                    .query(&[("locationId", business_id)]),
                &format!("conversation {conversation_id}"),
            )
            .await?;

        if envelope.conversation.business_id != business_id {
            return Err(CrmError::NotFound(format!("conversation {conversation_id}")));
        }
        Ok(envelope.conversation)
    }

    async fn find_or_create_conversation(
        &self,
        business_id: &str,
        phone: &str,
    ) -> Result<Conversation, CrmError> {
        let found: ConversationSearchResponse = self
            .fetch(
                self.request(Method::GET, "/conversations/search")
                    .query(&[("locationId", business_id), ("phone", phone)]),
                "conversation search",
            )
            .await?;

        if let Some(conversation) = found.conversations.into_iter().next() {
            return Ok(conversation);
        }

        debug!("No conversation for {phone} in {business_id}, creating one");
        let envelope: ConversationEnvelope = self
            .fetch(
                self.request(Method::POST, "/conversations/").json(&CreateConversationBody {
                    location_id: business_id,
                    phone,
                }),
                "conversation",
            )
            .await?;
        Ok(envelope.conversation)
    }

    async fn list_messages(
        &self,
        business_id: &str,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage, CrmError> {
        let mut query = vec![
            ("locationId", business_id.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("lastMessageId", cursor.to_string()));
        }

        let response: MessagesResponse = self
            .fetch(
                self.request(
                    Method::GET,
                    &format!("/conversations/{conversation_id}/messages"),
                )
                .query(&query),
                &format!("conversation {conversation_id}"),
            )
            .await?;

        let body = response.messages;
        Ok(MessagePage {
            messages: body.messages.into_iter().map(Message::from).collect(),
            has_more: body.next_page,
            next_cursor: body.last_message_id.filter(|_| body.next_page),
        })
    }

    async fn record_message(&self, business_id: &str, message: &Message) -> Result<(), CrmError> {
        let server_id = message.id.server_id().ok_or_else(|| {
            CrmError::InvalidInput("cannot record a message without a server id".to_string())
        })?;
        let path = match message.direction {
            Direction::Inbound => "/conversations/messages/inbound",
            Direction::Outbound => "/conversations/messages/outbound",
        };
        let message_type = match &message.message_type {
            MessageType::Sms => "SMS".to_string(),
            MessageType::Email => "Email".to_string(),
            MessageType::Call => "Call".to_string(),
            other => String::from(other.clone()),
        };

        self.execute(
            self.request(Method::POST, path).json(&RecordMessageBody {
                message_type,
                conversation_id: &message.conversation_id,
                location_id: business_id,
                alt_id: server_id,
                message: message.body.as_deref(),
                status: message.status.as_str(),
                date: message.date_added.to_rfc3339(),
            }),
            &format!("conversation {}", message.conversation_id),
        )
        .await?;
        Ok(())
    }

    async fn update_message_status(
        &self,
        business_id: &str,
        message_id: &str,
        status: &MessageStatus,
        error: Option<&str>,
    ) -> Result<(), CrmError> {
        self.execute(
            self.request(
                Method::PUT,
                &format!("/conversations/messages/{message_id}/status"),
            )
            .query(&[("locationId", business_id)])
            .json(&StatusBody {
                status: status.as_str(),
                error,
            }),
            &format!("message {message_id}"),
        )
        .await?;
        Ok(())
    }

    async fn send_email(
        &self,
        business_id: &str,
        conversation_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, CrmError> {
        let sent: SendMessageResponse = self
            .fetch(
                self.request(Method::POST, "/conversations/messages").json(&SendEmailBody {
                    message_type: "Email",
                    conversation_id,
                    location_id: business_id,
                    email_to: to,
                    html: body,
                }),
                &format!("conversation {conversation_id}"),
            )
            .await?;
        Ok(sent.message_id)
    }

    async fn get_email_detail(
        &self,
        business_id: &str,
        message_id: &str,
    ) -> Result<EmailDetail, CrmError> {
        let envelope: EmailEnvelope = self
            .fetch(
                self.request(
                    Method::GET,
                    &format!("/conversations/messages/email/{message_id}"),
                )
                .query(&[("locationId", business_id)]),
                &format!("email {message_id}"),
            )
            .await?;
        Ok(envelope.email)
    }

    async fn get_call_detail(
        &self,
        business_id: &str,
        call_id: &str,
    ) -> Result<CallDetail, CrmError> {
        let envelope: CallEnvelope = self
            .fetch(
                self.request(Method::GET, &format!("/conversations/calls/{call_id}"))
                    .query(&[("locationId", business_id)]),
                &format!("call {call_id}"),
            )
            .await?;
        Ok(envelope.call)
    }
}
