//! Combines the routes of every module into one router.

use axum::{http::StatusCode, routing::get, Json, Router};
use std::sync::Arc;

use crate::core::state::AppState;

pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "crmdesk",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
}

pub fn configure_api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .merge(crate::contacts::configure_contacts_routes())
        .merge(crate::pipelines::configure_pipelines_routes())
        .merge(crate::conversations::configure_conversations_routes())
        .merge(crate::channels::configure_webhook_routes())
        .merge(crate::llm::configure_agent_routes())
}

/// The full application with its state attached.
pub fn build_app(state: Arc<AppState>) -> Router {
    configure_api_routes().with_state(state)
}
