use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CrmBackend, CrmError};
use crate::contacts::import::BulkContactBatch;
use crate::contacts::types::{Contact, ContactPage, CreateContactRequest, Note};
use crate::conversations::types::{
    CallDetail, Conversation, Direction, EmailDetail, EmailMeta, Message, MessageId, MessageMeta,
    MessagePage, MessageStatus, MessageType,
};
use crate::core::config::normalize_phone;
use crate::pipelines::types::{Opportunity, OpportunityStatus, Pipeline};

#[derive(Debug, Default)]
struct BusinessData {
    contacts: Vec<Contact>,
    notes: HashMap<String, Vec<Note>>,
    pipelines: Vec<Pipeline>,
    opportunities: Vec<Opportunity>,
    conversations: Vec<Conversation>,
    messages: HashMap<String, Vec<Message>>,
    emails: HashMap<String, EmailDetail>,
    calls: HashMap<String, CallDetail>,
}

/// CRM kept in process memory, partitioned by business id. Used for local
/// development and by the test suite.
#[derive(Debug, Default)]
pub struct MemoryCrmBackend {
    businesses: RwLock<HashMap<String, BusinessData>>,
}

fn contact_from_request(business_id: &str, request: &CreateContactRequest) -> Contact {
    let now = Utc::now();
    Contact {
        id: Uuid::new_v4().to_string(),
        business_id: business_id.to_string(),
        first_name: request.first_name.clone(),
        last_name: request.last_name.clone(),
        email: request.email.clone(),
        phone: request.phone.clone(),
        additional_emails: request.additional_emails.clone(),
        additional_phones: request.additional_phones.clone(),
        tags: request.tags.clone(),
        dnd: false,
        dnd_settings: None,
        source: request.source.clone(),
        date_added: Some(now),
        date_updated: Some(now),
    }
}

impl MemoryCrmBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_contact(&self, contact: Contact) {
        let mut businesses = self.businesses.write().await;
        let data = businesses.entry(contact.business_id.clone()).or_default();
        data.contacts.retain(|c| c.id != contact.id);
        data.contacts.push(contact);
    }

    pub async fn insert_pipeline(&self, business_id: &str, pipeline: Pipeline) {
        let mut businesses = self.businesses.write().await;
        let data = businesses.entry(business_id.to_string()).or_default();
        data.pipelines.retain(|p| p.id != pipeline.id);
        data.pipelines.push(pipeline);
    }

    pub async fn insert_opportunity(&self, business_id: &str, opportunity: Opportunity) {
        let mut businesses = self.businesses.write().await;
        let data = businesses.entry(business_id.to_string()).or_default();
        data.opportunities.retain(|o| o.id != opportunity.id);
        data.opportunities.push(opportunity);
    }

    pub async fn insert_conversation(&self, conversation: Conversation) {
        let mut businesses = self.businesses.write().await;
        let data = businesses.entry(conversation.business_id.clone()).or_default();
        data.conversations.retain(|c| c.id != conversation.id);
        data.conversations.push(conversation);
    }

    pub async fn insert_message(&self, business_id: &str, message: Message) {
        let mut businesses = self.businesses.write().await;
        let data = businesses.entry(business_id.to_string()).or_default();
        upsert_message(data, message);
    }

    pub async fn insert_email(&self, business_id: &str, email: EmailDetail) {
        let mut businesses = self.businesses.write().await;
        let data = businesses.entry(business_id.to_string()).or_default();
        data.emails.insert(email.message_id.clone(), email);
    }

    pub async fn insert_call(&self, business_id: &str, call: CallDetail) {
        let mut businesses = self.businesses.write().await;
        let data = businesses.entry(business_id.to_string()).or_default();
        data.calls.insert(call.call_id.clone(), call);
    }

    /// Stored messages of a conversation in insertion order.
    pub async fn messages(&self, business_id: &str, conversation_id: &str) -> Vec<Message> {
        self.businesses
            .read()
            .await
            .get(business_id)
            .and_then(|data| data.messages.get(conversation_id))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn opportunities(&self, business_id: &str) -> Vec<Opportunity> {
        self.businesses
            .read()
            .await
            .get(business_id)
            .map(|data| data.opportunities.clone())
            .unwrap_or_default()
    }
}

fn upsert_message(data: &mut BusinessData, message: Message) {
    if let Some(conversation) = data
        .conversations
        .iter_mut()
        .find(|c| c.id == message.conversation_id)
    {
        conversation.last_message_type = Some(message.message_type.clone());
    }
    let thread = data.messages.entry(message.conversation_id.clone()).or_default();
    match thread.iter_mut().find(|m| m.id == message.id) {
        Some(existing) => *existing = message,
        None => thread.push(message),
    }
}

fn not_found(what: &str, id: &str) -> CrmError {
    CrmError::NotFound(format!("{what} {id}"))
}

#[async_trait]
impl CrmBackend for MemoryCrmBackend {
    async fn list_contacts(
        &self,
        business_id: &str,
        page: u32,
        limit: u32,
        tag: Option<&str>,
    ) -> Result<ContactPage, CrmError> {
        let businesses = self.businesses.read().await;
        let matching: Vec<&Contact> = businesses
            .get(business_id)
            .map(|data| {
                data.contacts
                    .iter()
                    .filter(|c| tag.map_or(true, |t| c.tags.iter().any(|ct| ct == t)))
                    .collect()
            })
            .unwrap_or_default();

        let skip = (page.saturating_sub(1) as usize) * limit as usize;
        Ok(ContactPage {
            total: matching.len() as u64,
            contacts: matching
                .into_iter()
                .skip(skip)
                .take(limit as usize)
                .cloned()
                .collect(),
        })
    }

    async fn get_contact(&self, business_id: &str, contact_id: &str) -> Result<Contact, CrmError> {
        self.businesses
            .read()
            .await
            .get(business_id)
            .and_then(|data| data.contacts.iter().find(|c| c.id == contact_id))
            .cloned()
            .ok_or_else(|| not_found("contact", contact_id))
    }

    async fn create_contact(
        &self,
        business_id: &str,
        request: &CreateContactRequest,
    ) -> Result<Contact, CrmError> {
        let contact = contact_from_request(business_id, request);
        self.insert_contact(contact.clone()).await;
        Ok(contact)
    }

    async fn update_contact(
        &self,
        business_id: &str,
        contact: &Contact,
    ) -> Result<Contact, CrmError> {
        let mut businesses = self.businesses.write().await;
        let stored = businesses
            .get_mut(business_id)
            .and_then(|data| data.contacts.iter_mut().find(|c| c.id == contact.id))
            .ok_or_else(|| not_found("contact", &contact.id))?;

        *stored = Contact {
            business_id: business_id.to_string(),
            date_updated: Some(Utc::now()),
            ..contact.clone()
        };
        Ok(stored.clone())
    }

    async fn delete_contact(&self, business_id: &str, contact_id: &str) -> Result<(), CrmError> {
        let mut businesses = self.businesses.write().await;
        let data = businesses
            .get_mut(business_id)
            .ok_or_else(|| not_found("contact", contact_id))?;

        let before = data.contacts.len();
        data.contacts.retain(|c| c.id != contact_id);
        if data.contacts.len() == before {
            return Err(not_found("contact", contact_id));
        }
        data.notes.remove(contact_id);
        Ok(())
    }

    async fn create_contacts_batch(
        &self,
        business_id: &str,
        batch: &BulkContactBatch,
    ) -> Result<usize, CrmError> {
        let mut businesses = self.businesses.write().await;
        let data = businesses.entry(business_id.to_string()).or_default();

        if !data.pipelines.iter().any(|p| p.id == batch.pipeline_id) {
            return Err(not_found("pipeline", &batch.pipeline_id));
        }

        for request in &batch.contacts {
            let contact = contact_from_request(business_id, request);
            data.opportunities.push(Opportunity {
                id: Uuid::new_v4().to_string(),
                name: contact.display_name(),
                monetary_value: 0.0,
                source: contact.source.clone(),
                pipeline_id: batch.pipeline_id.clone(),
                pipeline_stage_id: batch.pipeline_stage_id.clone(),
                contact_id: Some(contact.id.clone()),
                status: OpportunityStatus::Open,
            });
            data.contacts.push(contact);
        }

        debug!(
            "Imported {} contacts into pipeline {} for {}",
            batch.contacts.len(),
            batch.pipeline_id,
            business_id
        );
        Ok(batch.contacts.len())
    }

    async fn list_notes(&self, business_id: &str, contact_id: &str) -> Result<Vec<Note>, CrmError> {
        let businesses = self.businesses.read().await;
        let data = businesses
            .get(business_id)
            .filter(|data| data.contacts.iter().any(|c| c.id == contact_id))
            .ok_or_else(|| not_found("contact", contact_id))?;
        Ok(data.notes.get(contact_id).cloned().unwrap_or_default())
    }

    async fn create_note(
        &self,
        business_id: &str,
        contact_id: &str,
        body: &str,
        user_id: &str,
    ) -> Result<Note, CrmError> {
        let mut businesses = self.businesses.write().await;
        let data = businesses
            .get_mut(business_id)
            .filter(|data| data.contacts.iter().any(|c| c.id == contact_id))
            .ok_or_else(|| not_found("contact", contact_id))?;

        let note = Note {
            id: Uuid::new_v4().to_string(),
            contact_id: contact_id.to_string(),
            body: body.to_string(),
            user_id: Some(user_id.to_string()),
            date_added: Utc::now(),
            date_updated: None,
        };
        data.notes
            .entry(contact_id.to_string())
            .or_default()
            .push(note.clone());
        Ok(note)
    }

    async fn update_note(
        &self,
        business_id: &str,
        contact_id: &str,
        note_id: &str,
        body: &str,
        user_id: &str,
    ) -> Result<Note, CrmError> {
        let mut businesses = self.businesses.write().await;
        let note = businesses
            .get_mut(business_id)
            .and_then(|data| data.notes.get_mut(contact_id))
            .and_then(|notes| notes.iter_mut().find(|n| n.id == note_id))
            .ok_or_else(|| not_found("note", note_id))?;

        note.body = body.to_string();
        note.user_id = Some(user_id.to_string());
        note.date_updated = Some(Utc::now());
        Ok(note.clone())
    }

    async fn delete_note(
        &self,
        business_id: &str,
        contact_id: &str,
        note_id: &str,
    ) -> Result<(), CrmError> {
        let mut businesses = self.businesses.write().await;
        let notes = businesses
            .get_mut(business_id)
            .and_then(|data| data.notes.get_mut(contact_id))
            .ok_or_else(|| not_found("note", note_id))?;

        let before = notes.len();
        notes.retain(|n| n.id != note_id);
        if notes.len() == before {
            return Err(not_found("note", note_id));
        }
        Ok(())
    }

    async fn list_pipelines(&self, business_id: &str) -> Result<Vec<Pipeline>, CrmError> {
        Ok(self
            .businesses
            .read()
            .await
            .get(business_id)
            .map(|data| data.pipelines.clone())
            .unwrap_or_default())
    }

    async fn list_opportunities(
        &self,
        business_id: &str,
        pipeline_id: &str,
    ) -> Result<Vec<Opportunity>, CrmError> {
        let businesses = self.businesses.read().await;
        let data = businesses
            .get(business_id)
            .filter(|data| data.pipelines.iter().any(|p| p.id == pipeline_id))
            .ok_or_else(|| not_found("pipeline", pipeline_id))?;

        Ok(data
            .opportunities
            .iter()
            .filter(|o| o.pipeline_id == pipeline_id)
            .cloned()
            .collect())
    }

    async fn move_opportunity(
        &self,
        business_id: &str,
        opportunity_id: &str,
        stage_id: &str,
        action_type: &str,
    ) -> Result<Opportunity, CrmError> {
        let mut businesses = self.businesses.write().await;
        let data = businesses
            .get_mut(business_id)
            .ok_or_else(|| not_found("opportunity", opportunity_id))?;

        let pipeline_id = data
            .opportunities
            .iter()
            .find(|o| o.id == opportunity_id)
            .map(|o| o.pipeline_id.clone())
            .ok_or_else(|| not_found("opportunity", opportunity_id))?;

        let stage_known = data
            .pipelines
            .iter()
            .find(|p| p.id == pipeline_id)
            .is_some_and(|p| p.has_stage(stage_id));
        if !stage_known {
            return Err(CrmError::InvalidInput(format!(
                "stage {stage_id} is not part of pipeline {pipeline_id}"
            )));
        }

        let opportunity = data
            .opportunities
            .iter_mut()
            .find(|o| o.id == opportunity_id)
            .ok_or_else(|| not_found("opportunity", opportunity_id))?;
        opportunity.pipeline_stage_id = stage_id.to_string();
        debug!("Moved opportunity {opportunity_id} to {stage_id} ({action_type})");
        Ok(opportunity.clone())
    }

    async fn get_conversation(
        &self,
        business_id: &str,
        conversation_id: &str,
    ) -> Result<Conversation, CrmError> {
        self.businesses
            .read()
            .await
            .get(business_id)
            .and_then(|data| data.conversations.iter().find(|c| c.id == conversation_id))
            .cloned()
            .ok_or_else(|| not_found("conversation", conversation_id))
    }

    async fn find_or_create_conversation(
        &self,
        business_id: &str,
        phone: &str,
    ) -> Result<Conversation, CrmError> {
        let wanted = normalize_phone(phone);
        if wanted.is_empty() {
            return Err(CrmError::InvalidInput("phone number is empty".to_string()));
        }

        let mut businesses = self.businesses.write().await;
        let data = businesses.entry(business_id.to_string()).or_default();

        if let Some(existing) = data.conversations.iter().find(|c| {
            c.known_phones()
                .into_iter()
                .any(|p| normalize_phone(p) == wanted)
        }) {
            return Ok(existing.clone());
        }

        let contact = match data
            .contacts
            .iter()
            .find(|c| c.all_phones().iter().any(|p| normalize_phone(p) == wanted))
        {
            Some(contact) => contact.clone(),
            None => {
                let contact = contact_from_request(
                    business_id,
                    &CreateContactRequest {
                        phone: Some(phone.to_string()),
                        source: Some("sms".to_string()),
                        ..Default::default()
                    },
                );
                data.contacts.push(contact.clone());
                contact
            }
        };

        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            contact_id: contact.id.clone(),
            business_id: business_id.to_string(),
            full_name: Some(contact.display_name()),
            phone: contact.phone.clone(),
            alternate_phones: contact
                .additional_phones
                .iter()
                .map(|p| p.phone.clone())
                .collect(),
            email: contact.email.clone(),
            last_message_type: None,
        };
        data.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn list_messages(
        &self,
        business_id: &str,
        conversation_id: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<MessagePage, CrmError> {
        let businesses = self.businesses.read().await;
        let data = businesses
            .get(business_id)
            .filter(|data| data.conversations.iter().any(|c| c.id == conversation_id))
            .ok_or_else(|| not_found("conversation", conversation_id))?;

        let mut newest_first: Vec<&Message> = data
            .messages
            .get(conversation_id)
            .map(|messages| messages.iter().collect())
            .unwrap_or_default();
        newest_first.sort_by(|a, b| b.date_added.cmp(&a.date_added));

        let start = match cursor {
            Some(cursor) => {
                newest_first
                    .iter()
                    .position(|m| m.id.server_id() == Some(cursor))
                    .ok_or_else(|| CrmError::InvalidInput(format!("unknown cursor {cursor}")))?
                    + 1
            }
            None => 0,
        };

        let messages: Vec<Message> = newest_first
            .iter()
            .skip(start)
            .take(limit as usize)
            .map(|m| (*m).clone())
            .collect();
        let has_more = start + messages.len() < newest_first.len();
        let next_cursor = if has_more {
            messages
                .last()
                .and_then(|m| m.id.server_id())
                .map(str::to_string)
        } else {
            None
        };

        Ok(MessagePage {
            messages,
            has_more,
            next_cursor,
        })
    }

    async fn record_message(&self, business_id: &str, message: &Message) -> Result<(), CrmError> {
        if message.id.server_id().is_none() {
            return Err(CrmError::InvalidInput(
                "cannot record a message without a server id".to_string(),
            ));
        }

        let mut businesses = self.businesses.write().await;
        let data = businesses
            .get_mut(business_id)
            .filter(|data| {
                data.conversations
                    .iter()
                    .any(|c| c.id == message.conversation_id)
            })
            .ok_or_else(|| not_found("conversation", &message.conversation_id))?;

        upsert_message(data, message.clone());
        Ok(())
    }

    async fn update_message_status(
        &self,
        business_id: &str,
        message_id: &str,
        status: &MessageStatus,
        error: Option<&str>,
    ) -> Result<(), CrmError> {
        let mut businesses = self.businesses.write().await;
        let message = businesses
            .get_mut(business_id)
            .and_then(|data| {
                data.messages
                    .values_mut()
                    .flat_map(|messages| messages.iter_mut())
                    .find(|m| m.id.server_id() == Some(message_id))
            })
            .ok_or_else(|| not_found("message", message_id))?;

        message.status = status.clone();
        message.error = error.map(str::to_string);
        Ok(())
    }

    async fn send_email(
        &self,
        business_id: &str,
        conversation_id: &str,
        to: &str,
        body: &str,
    ) -> Result<String, CrmError> {
        let mut businesses = self.businesses.write().await;
        let data = businesses
            .get_mut(business_id)
            .filter(|data| data.conversations.iter().any(|c| c.id == conversation_id))
            .ok_or_else(|| not_found("conversation", conversation_id))?;

        let message_id = format!("em-{}", Uuid::new_v4());
        data.emails.insert(
            message_id.clone(),
            EmailDetail {
                message_id: message_id.clone(),
                subject: None,
                body: Some(body.to_string()),
                from: None,
                to: vec![to.to_string()],
                cc: Vec::new(),
            },
        );
        upsert_message(
            data,
            Message {
                id: MessageId::Confirmed(message_id.clone()),
                conversation_id: conversation_id.to_string(),
                direction: Direction::Outbound,
                message_type: MessageType::Email,
                body: Some(body.to_string()),
                status: MessageStatus::Sent,
                date_added: Utc::now(),
                meta: MessageMeta {
                    email: Some(EmailMeta {
                        direction: Some("outbound".to_string()),
                        subject: None,
                        message_ids: vec![message_id.clone()],
                    }),
                    ..Default::default()
                },
                attachments: Vec::new(),
                error: None,
            },
        );
        Ok(message_id)
    }

    async fn get_email_detail(
        &self,
        business_id: &str,
        message_id: &str,
    ) -> Result<EmailDetail, CrmError> {
        self.businesses
            .read()
            .await
            .get(business_id)
            .and_then(|data| data.emails.get(message_id))
            .cloned()
            .ok_or_else(|| not_found("email", message_id))
    }

    async fn get_call_detail(
        &self,
        business_id: &str,
        call_id: &str,
    ) -> Result<CallDetail, CrmError> {
        self.businesses
            .read()
            .await
            .get(business_id)
            .and_then(|data| data.calls.get(call_id))
            .cloned()
            .ok_or_else(|| not_found("call", call_id))
    }
}
