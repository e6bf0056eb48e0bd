//! In-memory message thread for one conversation.
//!
//! All transitions are synchronous methods on [`MessageThread`]; callers do
//! the network I/O and feed results back in. Invariants held after every
//! call:
//!
//! - no two entries share a [`MessageId`]
//! - entries are ordered by `date_added`, ties keep insertion order
//! - a failed page load never removes previously loaded entries
//! - an optimistic send stays a single entry through retries

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use super::compose::DeliveryRoute;
use super::types::{Direction, Message, MessageId, MessagePage, MessageStatus, MessageType};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThreadError {
    #[error("Unknown message {0}")]
    UnknownMessage(String),
    #[error("Message {0} is not in a failed state")]
    NotRetryable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    /// Newest page; used for the first load and for refreshes.
    Latest,
    /// Page before the oldest loaded entry.
    Older,
}

/// Handed out when a page request starts; responses are applied only if no
/// newer request of the same kind has already been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTicket {
    pub kind: PageKind,
    pub seq: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied { added: usize, updated: usize },
    Stale,
}

/// What is needed to send (or re-send) an outbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundDraft {
    pub body: String,
    pub route: DeliveryRoute,
}

#[derive(Debug, Clone, Default)]
pub struct MessageThread {
    messages: Vec<Message>,
    drafts: HashMap<Uuid, OutboundDraft>,
    has_more: bool,
    next_cursor: Option<String>,
    loaded: bool,
    issued_seq: u64,
    applied_seq: HashMap<PageKind, u64>,
    last_error: Option<String>,
}

impl MessageThread {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor.as_deref()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn find(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    pub fn begin_request(&mut self, kind: PageKind) -> RequestTicket {
        self.issued_seq += 1;
        RequestTicket {
            kind,
            seq: self.issued_seq,
        }
    }

    fn is_stale(&self, ticket: RequestTicket) -> bool {
        self.applied_seq
            .get(&ticket.kind)
            .is_some_and(|applied| ticket.seq <= *applied)
    }

    pub fn apply_page(&mut self, ticket: RequestTicket, page: MessagePage) -> ApplyOutcome {
        if self.is_stale(ticket) {
            return ApplyOutcome::Stale;
        }
        self.applied_seq.insert(ticket.kind, ticket.seq);

        // The cursor describes the oldest page we hold. A refresh of the
        // newest page does not move it once history has been loaded.
        if ticket.kind == PageKind::Older || !self.loaded {
            self.has_more = page.has_more;
            self.next_cursor = page.next_cursor;
        }
        self.loaded = true;
        self.last_error = None;

        let mut added = 0;
        let mut updated = 0;
        for message in page.messages {
            if self.upsert(message) {
                added += 1;
            } else {
                updated += 1;
            }
        }
        self.sort();

        ApplyOutcome::Applied { added, updated }
    }

    /// Records a failed page load. Loaded entries stay as they are.
    pub fn fail_request(&mut self, ticket: RequestTicket, error: impl Into<String>) -> bool {
        if self.is_stale(ticket) {
            return false;
        }
        self.last_error = Some(error.into());
        true
    }

    /// Adds an outbound message at the tail with status `sending`.
    pub fn push_pending(
        &mut self,
        conversation_id: &str,
        draft: OutboundDraft,
        now: DateTime<Utc>,
    ) -> Uuid {
        let client_id = Uuid::new_v4();
        let date_added = self
            .messages
            .last()
            .map_or(now, |last| last.date_added.max(now));

        let message_type = match draft.route {
            DeliveryRoute::Sms { .. } => MessageType::Sms,
            DeliveryRoute::Email { .. } => MessageType::Email,
        };

        self.messages.push(Message {
            id: MessageId::Pending(client_id),
            conversation_id: conversation_id.to_string(),
            direction: Direction::Outbound,
            message_type,
            body: Some(draft.body.clone()),
            status: MessageStatus::Sending,
            date_added,
            meta: Default::default(),
            attachments: Vec::new(),
            error: None,
        });
        self.drafts.insert(client_id, draft);
        client_id
    }

    fn pending_index(&self, client_id: Uuid) -> Result<usize, ThreadError> {
        let id = MessageId::Pending(client_id);
        self.messages
            .iter()
            .position(|m| m.id == id)
            .ok_or_else(|| ThreadError::UnknownMessage(client_id.to_string()))
    }

    /// The transport accepted the message. If a refresh already brought the
    /// server copy in, the optimistic entry folds into it.
    pub fn confirm(
        &mut self,
        client_id: Uuid,
        server_id: &str,
        status: MessageStatus,
    ) -> Result<(), ThreadError> {
        let index = self.pending_index(client_id)?;
        let confirmed = MessageId::Confirmed(server_id.to_string());

        if let Some(existing) = self.messages.iter().position(|m| m.id == confirmed) {
            self.messages[existing].status = status;
            self.messages[existing].error = None;
            self.messages.remove(index);
        } else {
            let message = &mut self.messages[index];
            message.id = confirmed;
            message.status = status;
            message.error = None;
        }

        self.drafts.remove(&client_id);
        Ok(())
    }

    pub fn fail(&mut self, client_id: Uuid, error: impl Into<String>) -> Result<(), ThreadError> {
        let index = self.pending_index(client_id)?;
        let message = &mut self.messages[index];
        message.status = MessageStatus::Failed;
        message.error = Some(error.into());
        Ok(())
    }

    /// Moves a failed optimistic message back to `sending` and returns what
    /// to re-send. The entry keeps its client id.
    pub fn begin_retry(&mut self, client_id: Uuid) -> Result<OutboundDraft, ThreadError> {
        let index = self.pending_index(client_id)?;
        if self.messages[index].status != MessageStatus::Failed {
            return Err(ThreadError::NotRetryable(client_id.to_string()));
        }
        let draft = self
            .drafts
            .get(&client_id)
            .cloned()
            .ok_or_else(|| ThreadError::UnknownMessage(client_id.to_string()))?;

        let message = &mut self.messages[index];
        message.status = MessageStatus::Sending;
        message.error = None;
        Ok(draft)
    }

    /// Delivery update for a confirmed message. Returns whether it was found.
    pub fn apply_status(
        &mut self,
        server_id: &str,
        status: MessageStatus,
        error: Option<String>,
    ) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|m| m.id.server_id() == Some(server_id))
        else {
            return false;
        };
        message.status = status;
        if error.is_some() {
            message.error = error;
        }
        true
    }

    /// Inbound or externally recorded message.
    pub fn append(&mut self, message: Message) {
        self.upsert(message);
        self.sort();
    }

    /// Returns true when the message was new.
    fn upsert(&mut self, message: Message) -> bool {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                *existing = message;
                false
            }
            None => {
                self.messages.push(message);
                true
            }
        }
    }

    fn sort(&mut self) {
        // Vec::sort_by_key is stable, so equal timestamps keep insertion order.
        self.messages.sort_by_key(|m| m.date_added);
    }
}
