use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub contact_id: String,
    #[serde(alias = "locationId")]
    pub business_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub alternate_phones: Vec<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub last_message_type: Option<MessageType>,
}

impl Conversation {
    pub fn has_phone(&self) -> bool {
        self.phone.as_deref().is_some_and(|p| !p.trim().is_empty())
    }

    pub fn has_email(&self) -> bool {
        self.email.as_deref().is_some_and(|e| !e.trim().is_empty())
    }

    pub fn known_phones(&self) -> Vec<&str> {
        self.phone
            .iter()
            .chain(self.alternate_phones.iter())
            .map(String::as_str)
            .collect()
    }
}

/// Identity of a message in a thread. Optimistic sends carry a client id
/// until the transport returns the server id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "state", content = "id", rename_all = "lowercase")]
pub enum MessageId {
    Pending(Uuid),
    Confirmed(String),
}

impl MessageId {
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Confirmed(id) => Some(id),
            Self::Pending(_) => None,
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending(id) => write!(f, "pending:{id}"),
            Self::Confirmed(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    Sms,
    Call,
    Email,
    Activity,
    Other(String),
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().trim_start_matches("TYPE_") {
            "SMS" => Self::Sms,
            "CALL" | "PHONE" => Self::Call,
            "EMAIL" => Self::Email,
            "ACTIVITY" => Self::Activity,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Sms => "TYPE_SMS".to_string(),
            MessageType::Call => "TYPE_CALL".to_string(),
            MessageType::Email => "TYPE_EMAIL".to_string(),
            MessageType::Activity => "TYPE_ACTIVITY".to_string(),
            MessageType::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageStatus {
    Sending,
    Queued,
    Sent,
    Delivered,
    Undelivered,
    Failed,
    Read,
    Unknown(String),
}

impl MessageStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "sending" => Self::Sending,
            "queued" | "accepted" | "scheduled" | "pending" => Self::Queued,
            "sent" => Self::Sent,
            "delivered" | "received" | "receiving" => Self::Delivered,
            "undelivered" => Self::Undelivered,
            "failed" | "canceled" => Self::Failed,
            "read" | "opened" => Self::Read,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Sending => "sending",
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Undelivered => "undelivered",
            Self::Failed => "failed",
            Self::Read => "read",
            Self::Unknown(raw) => raw,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Undelivered)
    }
}

impl From<String> for MessageStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<MessageStatus> for String {
    fn from(value: MessageStatus) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMeta {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMeta {
    #[serde(default)]
    pub direction: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub message_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMeta {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub opportunity_id: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call: Option<CallMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity: Option<ActivityMeta>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: String,
    pub direction: Direction,
    pub message_type: MessageType,
    #[serde(default)]
    pub body: Option<String>,
    pub status: MessageStatus,
    pub date_added: DateTime<Utc>,
    #[serde(default)]
    pub meta: MessageMeta,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Message as the CRM returns it. Server ids are always present.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub conversation_id: String,
    pub direction: Direction,
    pub message_type: MessageType,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    pub date_added: DateTime<Utc>,
    #[serde(default)]
    pub meta: MessageMeta,
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<RawMessage> for Message {
    fn from(raw: RawMessage) -> Self {
        Self {
            id: MessageId::Confirmed(raw.id),
            conversation_id: raw.conversation_id,
            direction: raw.direction,
            message_type: raw.message_type,
            body: raw.body,
            status: raw
                .status
                .map(|s| MessageStatus::parse(&s))
                .unwrap_or_else(|| MessageStatus::Unknown(String::new())),
            date_added: raw.date_added,
            meta: raw.meta,
            attachments: raw.attachments,
            error: raw.error,
        }
    }
}

/// One page of history, oldest-first or newest-first as the CRM returns it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailDetail {
    pub message_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallDetail {
    pub call_id: String,
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub recording_url: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub message: Option<String>,
    pub business_id: Option<String>,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub cursor: Option<String>,
    #[serde(default)]
    pub refresh: bool,
}
