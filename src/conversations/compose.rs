//! Channel and number selection for outbound messages.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::types::{Conversation, MessageType};
use crate::core::config::normalize_phone;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ComposeError {
    #[error("Message body is empty")]
    EmptyBody,
    #[error("Conversation has neither a phone number nor an email")]
    NoChannel,
    #[error("No from-number selected for this business")]
    MissingFromNumber,
    #[error("Number {0} is not owned by this business")]
    UnknownFromNumber(String),
    #[error("Number {0} is not a known phone for this contact")]
    UnknownToNumber(String),
    #[error("Conversation has no email address")]
    MissingRecipient,
}

/// How to pick a channel when the contact has both phone and email.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelPreference {
    /// Follow the type of the most recent message (email stays email,
    /// anything else goes out as SMS).
    #[default]
    LastMessageType,
    Sms,
    Email,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Sms,
    Email,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum DeliveryRoute {
    Sms { from: String, to: String },
    Email { to: String },
}

pub fn validate_body(body: Option<&str>) -> Result<String, ComposeError> {
    match body.map(str::trim) {
        Some(trimmed) if !trimmed.is_empty() => Ok(trimmed.to_string()),
        _ => Err(ComposeError::EmptyBody),
    }
}

/// Decided once per conversation from which contact points exist; never
/// switched mid-thread by a single message.
pub fn resolve_channel(
    conversation: &Conversation,
    preference: ChannelPreference,
) -> Result<Channel, ComposeError> {
    match (conversation.has_phone(), conversation.has_email()) {
        (true, false) => Ok(Channel::Sms),
        (false, true) => Ok(Channel::Email),
        (false, false) => Err(ComposeError::NoChannel),
        (true, true) => Ok(match preference {
            ChannelPreference::Sms => Channel::Sms,
            ChannelPreference::Email => Channel::Email,
            ChannelPreference::LastMessageType => match conversation.last_message_type {
                Some(MessageType::Email) => Channel::Email,
                _ => Channel::Sms,
            },
        }),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RouteRequest<'a> {
    pub requested_from: Option<&'a str>,
    pub requested_to: Option<&'a str>,
    pub selected_from: Option<&'a str>,
}

pub fn resolve_route(
    channel: Channel,
    conversation: &Conversation,
    owned_numbers: &[String],
    request: RouteRequest<'_>,
) -> Result<DeliveryRoute, ComposeError> {
    match channel {
        Channel::Email => {
            let to = conversation
                .email
                .clone()
                .filter(|e| !e.trim().is_empty())
                .ok_or(ComposeError::MissingRecipient)?;
            Ok(DeliveryRoute::Email { to })
        }
        Channel::Sms => {
            let from = resolve_from(owned_numbers, request)?;
            let to = resolve_to(conversation, request.requested_to)?;
            Ok(DeliveryRoute::Sms { from, to })
        }
    }
}

fn resolve_from(
    owned_numbers: &[String],
    request: RouteRequest<'_>,
) -> Result<String, ComposeError> {
    let candidate = request
        .requested_from
        .or(request.selected_from)
        .or(owned_numbers.first().map(String::as_str))
        .filter(|n| !n.trim().is_empty())
        .ok_or(ComposeError::MissingFromNumber)?;

    let wanted = normalize_phone(candidate);
    owned_numbers
        .iter()
        .find(|owned| normalize_phone(owned) == wanted)
        .cloned()
        .ok_or_else(|| ComposeError::UnknownFromNumber(candidate.to_string()))
}

fn resolve_to(
    conversation: &Conversation,
    requested: Option<&str>,
) -> Result<String, ComposeError> {
    let known = conversation.known_phones();
    match requested.filter(|n| !n.trim().is_empty()) {
        Some(requested) => {
            let wanted = normalize_phone(requested);
            known
                .into_iter()
                .find(|phone| normalize_phone(phone) == wanted)
                .map(str::to_string)
                .ok_or_else(|| ComposeError::UnknownToNumber(requested.to_string()))
        }
        None => known
            .first()
            .map(|phone| phone.to_string())
            .ok_or(ComposeError::NoChannel),
    }
}

/// The from-number each business currently sends with.
#[derive(Debug, Default)]
pub struct NumberSelection {
    selected: RwLock<HashMap<String, String>>,
}

impl NumberSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn selected(&self, business_id: &str) -> Option<String> {
        self.selected.read().await.get(business_id).cloned()
    }

    pub async fn select(
        &self,
        business_id: &str,
        number: &str,
        owned_numbers: &[String],
    ) -> Result<String, ComposeError> {
        let wanted = normalize_phone(number);
        let owned = owned_numbers
            .iter()
            .find(|owned| normalize_phone(owned) == wanted)
            .cloned()
            .ok_or_else(|| ComposeError::UnknownFromNumber(number.to_string()))?;

        self.selected
            .write()
            .await
            .insert(business_id.to_string(), owned.clone());
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(phone: Option<&str>, email: Option<&str>) -> Conversation {
        Conversation {
            id: "conv-1".to_string(),
            contact_id: "c1".to_string(),
            business_id: "biz-1".to_string(),
            full_name: Some("Ana".to_string()),
            phone: phone.map(str::to_string),
            alternate_phones: vec!["+15559990000".to_string()],
            email: email.map(str::to_string),
            last_message_type: None,
        }
    }

    fn owned() -> Vec<String> {
        vec!["+15550001111".to_string(), "+15550002222".to_string()]
    }

    #[test]
    fn test_validate_body() {
        assert_eq!(validate_body(Some("  hi ")), Ok("hi".to_string()));
        assert_eq!(validate_body(Some("   ")), Err(ComposeError::EmptyBody));
        assert_eq!(validate_body(None), Err(ComposeError::EmptyBody));
    }

    #[test]
    fn test_channel_from_contact_points() {
        let pref = ChannelPreference::LastMessageType;
        assert_eq!(resolve_channel(&conversation(Some("555"), None), pref), Ok(Channel::Sms));
        assert_eq!(resolve_channel(&conversation(None, Some("a@b.c")), pref), Ok(Channel::Email));
        assert_eq!(resolve_channel(&conversation(None, None), pref), Err(ComposeError::NoChannel));
    }

    #[test]
    fn test_mixed_contact_follows_preference() {
        let mut conv = conversation(Some("555"), Some("a@b.c"));
        assert_eq!(resolve_channel(&conv, ChannelPreference::LastMessageType), Ok(Channel::Sms));

        conv.last_message_type = Some(MessageType::Email);
        assert_eq!(resolve_channel(&conv, ChannelPreference::LastMessageType), Ok(Channel::Email));
        assert_eq!(resolve_channel(&conv, ChannelPreference::Sms), Ok(Channel::Sms));

        conv.last_message_type = Some(MessageType::Call);
        assert_eq!(resolve_channel(&conv, ChannelPreference::LastMessageType), Ok(Channel::Sms));
        assert_eq!(resolve_channel(&conv, ChannelPreference::Email), Ok(Channel::Email));
    }

    #[test]
    fn test_sms_route_defaults() {
        let conv = conversation(Some("5551234567"), None);
        let route = resolve_route(
            Channel::Sms,
            &conv,
            &owned(),
            RouteRequest {
                selected_from: Some("+15550002222"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            route,
            DeliveryRoute::Sms {
                from: "+15550002222".to_string(),
                to: "5551234567".to_string()
            }
        );
    }

    #[test]
    fn test_sms_route_to_alternate_phone() {
        let conv = conversation(Some("5551234567"), None);
        let route = resolve_route(
            Channel::Sms,
            &conv,
            &owned(),
            RouteRequest {
                requested_to: Some("1 (555) 999-0000"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            route,
            DeliveryRoute::Sms {
                from: "+15550001111".to_string(),
                to: "+15559990000".to_string()
            }
        );
    }

    #[test]
    fn test_sms_route_rejects_unknown_numbers() {
        let conv = conversation(Some("5551234567"), None);
        let err = resolve_route(
            Channel::Sms,
            &conv,
            &owned(),
            RouteRequest {
                requested_from: Some("+19999999999"),
                ..Default::default()
            },
        );
        assert_eq!(err, Err(ComposeError::UnknownFromNumber("+19999999999".to_string())));

        let err = resolve_route(
            Channel::Sms,
            &conv,
            &owned(),
            RouteRequest {
                requested_to: Some("+10000000000"),
                ..Default::default()
            },
        );
        assert_eq!(err, Err(ComposeError::UnknownToNumber("+10000000000".to_string())));

        let err = resolve_route(Channel::Sms, &conv, &[], RouteRequest::default());
        assert_eq!(err, Err(ComposeError::MissingFromNumber));
    }

    #[test]
    fn test_email_route_ignores_numbers() {
        let conv = conversation(None, Some("ana@example.com"));
        let route = resolve_route(
            Channel::Email,
            &conv,
            &[],
            RouteRequest {
                requested_from: Some("+15550001111"),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(route, DeliveryRoute::Email { to: "ana@example.com".to_string() });
    }

    #[tokio::test]
    async fn test_number_selection_must_be_owned() {
        let selection = NumberSelection::new();
        assert!(selection.select("biz-1", "+19999999999", &owned()).await.is_err());
        assert_eq!(selection.selected("biz-1").await, None);

        let chosen = selection.select("biz-1", "15550002222", &owned()).await.unwrap();
        assert_eq!(chosen, "+15550002222");
        assert_eq!(selection.selected("biz-1").await.as_deref(), Some("+15550002222"));
    }
}
