use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::conversations::compose::ChannelPreference;

pub const ENV_PREFIX: &str = "CRMDESK_";
pub const CONFIG_PATH_VAR: &str = "CRMDESK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "crmdesk.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub crm: CrmConfig,
    pub auth: AuthConfig,
    pub twilio: TwilioConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
    pub conversations: ConversationsConfig,
    pub contacts: ContactsConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrmBackendKind {
    #[default]
    Http,
    Memory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrmConfig {
    pub backend: CrmBackendKind,
    pub base_url: String,
    pub api_key: String,
    pub api_version: String,
    pub timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            backend: CrmBackendKind::Http,
            base_url: "https://services.leadconnectorhq.com".to_string(),
            api_key: String::new(),
            api_version: "2021-07-28".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    pub url: String,
    pub anon_key: String,
    pub credential_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            anon_key: String::new(),
            credential_ttl_secs: 300,
        }
    }
}

impl AuthConfig {
    pub fn credential_ttl(&self) -> Duration {
        Duration::from_secs(self.credential_ttl_secs)
    }
}

/// A phone number owned by a business, used as a from-number for SMS and to
/// route inbound webhooks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedNumber {
    pub phone_number: String,
    pub business_id: String,
    #[serde(default)]
    pub friendly_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TwilioConfig {
    pub base_url: String,
    pub account_sid: String,
    pub auth_token: String,
    pub status_callback_url: Option<String>,
    pub webhook_url: Option<String>,
    /// Unset means on whenever an account is configured.
    pub validate_signatures: Option<bool>,
    pub numbers: Vec<OwnedNumber>,
}

impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.twilio.com/2010-04-01".to_string(),
            account_sid: String::new(),
            auth_token: String::new(),
            status_callback_url: None,
            webhook_url: None,
            validate_signatures: None,
            numbers: Vec::new(),
        }
    }
}

impl TwilioConfig {
    pub fn signatures_required(&self) -> bool {
        self.validate_signatures
            .unwrap_or_else(|| !self.account_sid.is_empty())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub prompt_path: PathBuf,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            prompt_path: PathBuf::from("./data/agent_prompt.txt"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversationsConfig {
    pub page_size: u32,
    pub channel_preference: ChannelPreference,
    /// Loaded threads not touched for this long are dropped and refetched
    /// on the next open.
    pub thread_idle_secs: u64,
    pub max_threads: u64,
    pub detail_cache_capacity: u64,
    pub detail_cache_ttl_secs: u64,
}

impl Default for ConversationsConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            channel_preference: ChannelPreference::LastMessageType,
            thread_idle_secs: 1800,
            max_threads: 5_000,
            detail_cache_capacity: 2_000,
            detail_cache_ttl_secs: 3600,
        }
    }
}

impl ConversationsConfig {
    pub fn thread_idle(&self) -> Duration {
        Duration::from_secs(self.thread_idle_secs)
    }

    pub fn detail_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.detail_cache_ttl_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContactsConfig {
    pub cache_ttl_secs: u64,
}

impl Default for ContactsConfig {
    fn default() -> Self {
        Self { cache_ttl_secs: 60 }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file named by `CRMDESK_CONFIG` (if it exists),
    /// then `CRMDESK_*` environment variables with `__` separating sections.
    pub fn load() -> Result<Self, anyhow::Error> {
        let path = std::env::var(CONFIG_PATH_VAR)
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::figment(&path).extract().map_err(anyhow::Error::from)
    }

    pub fn figment(path: &str) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Business that owns `phone_number`, if any.
    pub fn business_for_number(&self, phone_number: &str) -> Option<&str> {
        let wanted = normalize_phone(phone_number);
        self.twilio
            .numbers
            .iter()
            .find(|n| normalize_phone(&n.phone_number) == wanted)
            .map(|n| n.business_id.as_str())
    }

    pub fn numbers_for_business(&self, business_id: &str) -> Vec<OwnedNumber> {
        self.twilio
            .numbers
            .iter()
            .filter(|n| n.business_id == business_id)
            .cloned()
            .collect()
    }
}

/// Digits only, so "+1 (555) 123-4567" and "15551234567" compare equal.
pub fn normalize_phone(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}
