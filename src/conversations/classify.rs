//! Decides how a thread entry is presented. The first matching rule wins.

use serde::Serialize;

use super::types::{Direction, Message, MessageType};

const DND_ACTIVITY_TYPES: [&str; 4] = [
    "user_dnd_enabled",
    "user_dnd_disabled",
    "contact_dnd_enabled",
    "contact_dnd_disabled",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RenderKind {
    #[serde(rename_all = "camelCase")]
    DndEvent {
        enabled: bool,
        title: String,
        actor: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Activity {
        title: String,
        opportunity_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Call {
        call_id: Option<String>,
        duration: Option<u32>,
        status: Option<String>,
        has_recording: bool,
    },
    #[serde(rename_all = "camelCase")]
    Email {
        direction: String,
        subject: Option<String>,
        outbound: bool,
    },
    #[serde(rename_all = "camelCase")]
    Text {
        outbound: bool,
        has_attachments: bool,
    },
    Nothing,
}

pub fn classify(message: &Message) -> RenderKind {
    let activity = message.meta.activity.as_ref();
    let title = activity
        .and_then(|a| a.title.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty());

    if let (Some(title), Some(activity)) = (title, activity) {
        if let Some(kind) = activity
            .activity_type
            .as_deref()
            .filter(|t| DND_ACTIVITY_TYPES.contains(t))
        {
            return RenderKind::DndEvent {
                enabled: kind.ends_with("_enabled"),
                title: title.to_string(),
                actor: activity.actor.clone(),
            };
        }
        return RenderKind::Activity {
            title: title.to_string(),
            opportunity_id: activity.opportunity_id.clone(),
        };
    }

    if message.message_type == MessageType::Call {
        let call = message.meta.call.clone().unwrap_or_default();
        return RenderKind::Call {
            call_id: call.call_id,
            duration: call.duration,
            status: call.status,
            has_recording: call.recording_url.is_some(),
        };
    }

    if let Some(email) = message.meta.email.as_ref() {
        if let Some(direction) = email.direction.as_deref() {
            return RenderKind::Email {
                direction: direction.to_string(),
                subject: email.subject.clone(),
                outbound: message.direction == Direction::Outbound,
            };
        }
    }

    let has_body = message.body.as_deref().is_some_and(|b| !b.trim().is_empty());
    if has_body || !message.attachments.is_empty() {
        return RenderKind::Text {
            outbound: message.direction == Direction::Outbound,
            has_attachments: !message.attachments.is_empty(),
        };
    }

    RenderKind::Nothing
}
