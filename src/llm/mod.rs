use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::config::LlmConfig;

pub mod handlers;
pub mod prompt_store;

pub use handlers::configure_agent_routes;
pub use prompt_store::PromptStore;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM is not configured")]
    NotConfigured,
    #[error("Network error: {0}")]
    Network(String),
    #[error("LLM API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("LLM returned no reply")]
    EmptyReply,
    #[error("Prompt storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// Per-request overrides sent by the test console.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_human_escalation_needed: Option<bool>,
    #[serde(rename = "isDND", default, skip_serializing_if = "Option::is_none")]
    pub is_dnd: Option<bool>,
}

impl AgentReply {
    /// Reads the JSON object the agent is asked for, or keeps the whole text
    /// as the message when the model ignored the format.
    pub fn from_content(content: &str) -> Self {
        match serde_json::from_str::<AgentReply>(content.trim()) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Agent reply is not structured JSON: {e}");
                Self {
                    message: content.to_string(),
                    is_human_escalation_needed: None,
                    is_dnd: None,
                }
            }
        }
    }
}

#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn reply(
        &self,
        system_prompt: &str,
        conversation: &[ChatTurn],
        settings: &AgentSettings,
    ) -> Result<AgentReply, AgentError>;
}

pub struct OpenAiAgent {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiAgent {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        }
    }

    fn build_body(
        &self,
        system_prompt: &str,
        conversation: &[ChatTurn],
        settings: &AgentSettings,
    ) -> Value {
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        if !system_prompt.trim().is_empty() {
            messages.push(serde_json::json!({"role": "system", "content": system_prompt}));
        }
        messages.extend(
            conversation
                .iter()
                .map(|turn| serde_json::json!({"role": turn.role, "content": turn.content})),
        );

        let mut body = serde_json::json!({
            "model": settings.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "response_format": {"type": "json_object"},
        });
        if let Some(temperature) = settings.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        body
    }
}

#[async_trait]
impl AgentBackend for OpenAiAgent {
    async fn reply(
        &self,
        system_prompt: &str,
        conversation: &[ChatTurn],
        settings: &AgentSettings,
    ) -> Result<AgentReply, AgentError> {
        if self.api_key.is_empty() {
            return Err(AgentError::NotConfigured);
        }

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.build_body(system_prompt, conversation, settings))
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            warn!("LLM request failed with {status}: {message}");
            return Err(AgentError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let result: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;
        let content = result["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.trim().is_empty())
            .ok_or(AgentError::EmptyReply)?;

        Ok(AgentReply::from_content(content))
    }
}
