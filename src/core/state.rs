use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::auth::{AuthBackend, CredentialCache, HttpAuthBackend};
use super::cache::TtlCache;
use super::config::{AppConfig, CrmBackendKind};
use crate::channels::{SmsTransport, TwilioSmsChannel, UnconfiguredSmsTransport};
use crate::contacts::types::ContactPage;
use crate::conversations::ConversationService;
use crate::crm::{CrmBackend, CrmError, HttpCrmBackend, MemoryCrmBackend};
use crate::llm::{AgentBackend, OpenAiAgent, PromptStore};

/// Business, page, limit and tag filter of a contact listing.
pub type ContactPageKey = (String, u32, u32, Option<String>);

pub struct AppState {
    pub config: AppConfig,
    pub crm: Arc<dyn CrmBackend>,
    pub credentials: CredentialCache,
    pub conversations: ConversationService,
    pub contacts_cache: TtlCache<ContactPageKey, ContactPage>,
    pub agent: Arc<dyn AgentBackend>,
    pub prompts: PromptStore,
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wires the services around already constructed collaborators.
    pub fn new(
        config: AppConfig,
        crm: Arc<dyn CrmBackend>,
        auth: Arc<dyn AuthBackend>,
        transport: Arc<dyn SmsTransport>,
        agent: Arc<dyn AgentBackend>,
        shutdown: CancellationToken,
    ) -> Self {
        let conversations = ConversationService::new(
            crm.clone(),
            transport,
            config.twilio.numbers.clone(),
            config.conversations.clone(),
            shutdown.clone(),
        );
        Self {
            credentials: CredentialCache::new(auth, config.auth.credential_ttl()),
            contacts_cache: TtlCache::new(Duration::from_secs(config.contacts.cache_ttl_secs)),
            prompts: PromptStore::new(config.agent.prompt_path.clone()),
            conversations,
            crm,
            agent,
            shutdown,
            config,
        }
    }

    /// Builds the production collaborators named by the configuration.
    pub fn from_config(config: AppConfig, shutdown: CancellationToken) -> Result<Self, CrmError> {
        let crm: Arc<dyn CrmBackend> = match config.crm.backend {
            CrmBackendKind::Http => {
                info!("Using CRM API at {}", config.crm.base_url);
                Arc::new(HttpCrmBackend::new(&config.crm)?)
            }
            CrmBackendKind::Memory => {
                warn!("Using the in-memory CRM backend, data is lost on restart");
                Arc::new(MemoryCrmBackend::new())
            }
        };

        let transport: Arc<dyn SmsTransport> = if config.twilio.account_sid.is_empty() {
            warn!("Twilio account is not configured, SMS sending is disabled");
            Arc::new(UnconfiguredSmsTransport)
        } else {
            Arc::new(TwilioSmsChannel::new(&config.twilio))
        };

        let auth = Arc::new(HttpAuthBackend::new(&config.auth.url, &config.auth.anon_key));
        let agent = Arc::new(OpenAiAgent::new(&config.llm));

        Ok(Self::new(config, crm, auth, transport, agent, shutdown))
    }
}
