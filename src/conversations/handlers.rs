use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use log::{error, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::service::{NumberView, SendOutcome, ThreadView};
use super::types::{CallDetail, EmailDetail, MessagesQuery, SendMessageRequest};
use crate::core::auth::AuthContext;
use crate::core::error::{ApiError, ApiResponse, ApiResult};
use crate::core::state::AppState;

#[derive(Debug, Serialize)]
pub struct EmailBody {
    pub email: EmailDetail,
}

#[derive(Debug, Serialize)]
pub struct CallBody {
    pub call: CallDetail,
}

#[derive(Debug, Serialize)]
pub struct NumbersBody {
    pub numbers: Vec<NumberView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectNumberRequest {
    pub phone_number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedNumberBody {
    pub phone_number: String,
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(conversation_id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<ThreadView> {
    let view = state
        .conversations
        .load_page(
            auth.business_id(),
            &conversation_id,
            query.cursor.as_deref().filter(|c| !c.is_empty()),
            query.refresh,
        )
        .await
        .map_err(|e| {
            error!("Failed to load messages for {conversation_id}: {e}");
            ApiError::from(e)
        })?;
    Ok(ApiResponse::ok(view))
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(conversation_id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<SendOutcome> {
    let business_id = auth.business_id();
    match req.business_id.as_deref().filter(|b| !b.is_empty()) {
        None => return Err(ApiError::missing("businessId")),
        Some(requested) if requested != business_id => {
            warn!(
                "Send to {conversation_id} named business {requested}, session has {business_id}"
            );
            return Err(ApiError::Validation(
                "businessId does not match the signed-in business".to_string(),
            ));
        }
        Some(_) => {}
    }

    let outcome = state
        .conversations
        .send(business_id, &conversation_id, &req)
        .await?;
    Ok(ApiResponse::ok(outcome))
}

pub async fn retry_message(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((conversation_id, client_id)): Path<(String, String)>,
) -> ApiResult<SendOutcome> {
    let client_id = Uuid::parse_str(&client_id)
        .map_err(|_| ApiError::Validation(format!("Invalid client id: {client_id}")))?;
    let outcome = state
        .conversations
        .retry(auth.business_id(), &conversation_id, client_id)
        .await?;
    Ok(ApiResponse::ok(outcome))
}

pub async fn email_detail(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((_conversation_id, message_id)): Path<(String, String)>,
) -> ApiResult<EmailBody> {
    let email = state
        .conversations
        .email_detail(auth.business_id(), &message_id)
        .await?;
    Ok(ApiResponse::ok(EmailBody { email }))
}

pub async fn call_detail(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((_conversation_id, call_id)): Path<(String, String)>,
) -> ApiResult<CallBody> {
    let call = state
        .conversations
        .call_detail(auth.business_id(), &call_id)
        .await?;
    Ok(ApiResponse::ok(CallBody { call }))
}

pub async fn list_numbers(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> ApiResult<NumbersBody> {
    let numbers = state.conversations.list_numbers(auth.business_id()).await;
    Ok(ApiResponse::ok(NumbersBody { numbers }))
}

pub async fn select_number(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<SelectNumberRequest>,
) -> ApiResult<SelectedNumberBody> {
    let number = req
        .phone_number
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| ApiError::missing("phoneNumber"))?;
    let phone_number = state
        .conversations
        .select_number(auth.business_id(), &number)
        .await?;
    Ok(ApiResponse::ok(SelectedNumberBody { phone_number }))
}

pub fn configure_conversations_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/conversations/:id/messages", get(list_messages))
        .route("/api/conversations/:id/send", post(send_message))
        .route(
            "/api/conversations/:id/messages/:message_id/retry",
            post(retry_message),
        )
        .route(
            "/api/conversations/:id/messages/:message_id/email",
            get(email_detail),
        )
        .route("/api/conversations/:id/calls/:call_id", get(call_detail))
        .route("/api/twilio/numbers", get(list_numbers))
        .route("/api/twilio/numbers/selected", put(select_number))
}
