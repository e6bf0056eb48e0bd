//! Twilio posts both inbound messages and delivery reports to the same URL.

use axum::{extract::State, http::HeaderMap, routing::post, Form, Router};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::twilio_sms::{
    parse_incoming_webhook, parse_status_callback, validate_webhook_signature,
};
use crate::conversations::service::InboundOutcome;
use crate::core::error::{ApiError, ApiResponse, ApiResult};
use crate::core::state::AppState;

const SIGNATURE_HEADER: &str = "X-Twilio-Signature";

fn check_signature(
    state: &AppState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Result<(), ApiError> {
    let twilio = &state.config.twilio;
    if !twilio.signatures_required() {
        return Ok(());
    }

    let url = twilio
        .webhook_url
        .as_deref()
        .ok_or_else(|| ApiError::Internal("twilio.webhook_url is not configured".to_string()))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized(format!("missing {SIGNATURE_HEADER}")))?;

    if validate_webhook_signature(&twilio.auth_token, signature, url, params) {
        Ok(())
    } else {
        warn!("Rejected Twilio webhook with a bad signature");
        Err(ApiError::Unauthorized("invalid webhook signature".to_string()))
    }
}

pub async fn twilio_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Form(params): Form<HashMap<String, String>>,
) -> ApiResult<Value> {
    check_signature(&state, &headers, &params)?;

    if params.contains_key("MessageStatus") {
        if params.contains_key("Body") {
            warn!(
                "Webhook {} carries both a status and a body, treating it as a status report",
                params.get("MessageSid").map(String::as_str).unwrap_or("?")
            );
        }
        let callback = parse_status_callback(&params)?;
        debug!(
            "Status {} for message {}",
            callback.message_status, callback.message_sid
        );
        let applied = state.conversations.apply_status(&callback).await?;
        return Ok(ApiResponse::ok(json!({
            "kind": "status",
            "messageSid": callback.message_sid,
            "applied": applied,
        })));
    }

    let incoming = parse_incoming_webhook(&params)?;
    let outcome = state.conversations.record_inbound(incoming).await?;
    let routed = match &outcome {
        InboundOutcome::Routed {
            conversation_id, ..
        } => {
            info!("Inbound SMS stored in conversation {conversation_id}");
            true
        }
        InboundOutcome::Unrouted => false,
    };
    Ok(ApiResponse::ok(json!({
        "kind": "inbound",
        "routed": routed,
        "result": outcome,
    })))
}

pub fn configure_webhook_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/twilio/webhook", post(twilio_webhook))
}
