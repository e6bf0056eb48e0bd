use axum::{extract::State, routing::{get, post}, Json, Router};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{AgentReply, AgentSettings, ChatTurn};
use crate::core::auth::AuthContext;
use crate::core::error::{ApiError, ApiResponse, ApiResult};
use crate::core::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub conversation: Option<Vec<ChatTurn>>,
    #[serde(default)]
    pub config: AgentSettings,
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PromptBody {
    pub content: String,
}

/// Runs one agent turn. A prompt in `config` overrides the saved one.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<ChatRequest>,
) -> ApiResult<AgentReply> {
    let conversation = req
        .conversation
        .filter(|turns| !turns.is_empty())
        .ok_or_else(|| ApiError::missing("conversation"))?;

    let system_prompt = match req.config.prompt.as_deref() {
        Some(prompt) => prompt.to_string(),
        None => state.prompts.load().await?,
    };

    let reply = state
        .agent
        .reply(&system_prompt, &conversation, &req.config)
        .await
        .map_err(|e| {
            error!("Agent reply failed for {}: {e}", auth.business_id());
            ApiError::from(e)
        })?;

    if reply.is_human_escalation_needed == Some(true) {
        info!("Agent asked for a human in business {}", auth.business_id());
    }
    Ok(ApiResponse::ok(reply))
}

pub async fn get_prompt(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
) -> ApiResult<PromptBody> {
    let content = state.prompts.load().await?;
    Ok(ApiResponse::ok(PromptBody { content }))
}

pub async fn save_prompt(
    State(state): State<Arc<AppState>>,
    _auth: AuthContext,
    Json(req): Json<PromptRequest>,
) -> ApiResult<PromptBody> {
    let content = req.content.ok_or_else(|| ApiError::missing("content"))?;
    state.prompts.save(&content).await?;
    Ok(ApiResponse::ok(PromptBody { content }))
}

pub fn configure_agent_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/chatai", post(chat))
        .route("/api/ai-agent/test/editor", get(get_prompt).post(save_prompt))
}
