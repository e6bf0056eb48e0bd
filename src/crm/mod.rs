//! Boundary to the external CRM that owns contacts, pipelines and
//! conversation history. Every call is scoped by the business id first.

use async_trait::async_trait;

use crate::contacts::import::BulkContactBatch;
use crate::contacts::types::{Contact, ContactPage, CreateContactRequest, Note};
use crate::conversations::types::{
    CallDetail, Conversation, EmailDetail, Message, MessagePage, MessageStatus,
};
use crate::pipelines::types::{Opportunity, Pipeline};

pub mod http_client;
pub mod memory;

pub use http_client::HttpCrmBackend;
pub use memory::MemoryCrmBackend;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CrmError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("CRM API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Unexpected response shape: {0}")]
    Schema(String),
}

#[async_trait]
pub trait CrmBackend: Send + Sync {
    async fn list_contacts(
        &self,
        business_id: &str,
        page: u32,
        limit: u32,
        tag: Option<&str>,
    ) -> Result<ContactPage, CrmError>;

    async fn get_contact(&self, business_id: &str, contact_id: &str) -> Result<Contact, CrmError>;

    async fn create_contact(
        &self,
        business_id: &str,
        request: &CreateContactRequest,
    ) -> Result<Contact, CrmError>;

    /// Replaces the stored contact with `contact`.
    async fn update_contact(
        &self,
        business_id: &str,
        contact: &Contact,
    ) -> Result<Contact, CrmError>;

    async fn delete_contact(&self, business_id: &str, contact_id: &str) -> Result<(), CrmError>;

    /// Creates every contact of the batch in one call and returns how many
    /// were accepted.
    async fn create_contacts_batch(
        &self,
        business_id: &str,
        batch: &BulkContactBatch,
    ) -> Result<usize, CrmError>;

    async fn list_notes(&self, business_id: &str, contact_id: &str) -> Result<Vec<Note>, CrmError>;

    async fn create_note(
        &self,
        business_id: &str,
        contact_id: &str,
        body: &str,
        user_id: &str,
    ) -> Result<Note, CrmError>;

    async fn update_note(
        &self,
        business_id: &str,
        contact_id: &str,
        note_id: &str,
        body: &str,
        user_id: &str,
    ) -> Result<Note, CrmError>;

    async fn delete_note(
        &self,
        business_id: &str,
        contact_id: &str,
        note_id: &str,
    ) -> Result<(), CrmError>;

    async fn list_pipelines(&self, business_id: &str) -> Result<Vec<Pipeline>, CrmError>;

    async fn list_opportunities(
        &self,
        business_id: &str,
        pipeline_id: &str,
    ) -> Result<Vec<Opportunity>, CrmError>;

    async fn move_opportunity(
        &self,
        business_id: &str,
        opportunity_id: &str,
        stage_id: &str,
        action_type: &str,
    ) -> Result<Opportunity, CrmError>;

    async fn get_conversation(
        &self,
        business_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, CrmError>;

    async fn find_or_create_conversation(
        &self,
        business_id: &str,
        phone: &str,
    ) -> Result<Conversation, CrmError>;

    /// Newest messages first; `cursor` continues from the oldest message of
    /// the previous page.
    async fn list_messages(
        &self,
        business_id: &str,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage, CrmError>;

    /// Persists a message delivered outside the CRM (SMS transport or an
    /// inbound webhook). The message must carry its server id.
    async fn record_message(&self, business_id: &str, message: &Message) -> Result<(), CrmError>;

    async fn update_message_status(
        &self,
        business_id: &str,
        message_id: &str,
        status: &MessageStatus,
        error: Option<&str>,
    ) -> Result<(), CrmError>;

    /// Sends an email through the CRM and returns the server message id.
    async fn send_email(
        &self,
        business_id: &str,
        conversation_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, CrmError>;

    async fn get_email_detail(
        &self,
        business_id: &str,
        message_id: &str,
    ) -> Result<EmailDetail, CrmError>;

    async fn get_call_detail(
        &self,
        business_id: &str,
        call_id: &str,
    ) -> Result<CallDetail, CrmError>;
}
