//! Per-contact, per-channel do-not-disturb transitions.
//!
//! Each channel is a two-state toggle (`inactive` <-> `active`). Every write
//! stamps an audit message with the actor and an ISO-8601 timestamp, keeps
//! the channel's `code`, and recomputes the contact's aggregate `dnd` flag.

use chrono::{DateTime, SecondsFormat, Utc};

use super::types::{Contact, DndChannel, DndChannelSetting, DndSettings, DndStatus};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DndError {
    #[error("DND settings are not initialized for contact {0}")]
    NotInitialized(String),
}

/// Creates settings with every channel inactive. Returns `false` when the
/// contact already had settings.
pub fn initialize_dnd(contact: &mut Contact) -> bool {
    if contact.dnd_settings.is_some() {
        return false;
    }
    contact.dnd_settings = Some(DndSettings::all_inactive());
    contact.recompute_dnd();
    true
}

pub fn toggle_dnd(
    contact: &mut Contact,
    channel: DndChannel,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<DndStatus, DndError> {
    let current = contact
        .dnd_settings
        .as_ref()
        .ok_or_else(|| DndError::NotInitialized(contact.id.clone()))?
        .status(channel);

    set_dnd(contact, channel, current.toggled(), actor, now)
}

/// Moves `channel` to `target`. Asking for the current state changes nothing.
pub fn set_dnd(
    contact: &mut Contact,
    channel: DndChannel,
    target: DndStatus,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<DndStatus, DndError> {
    let Some(settings) = contact.dnd_settings.as_mut() else {
        return Err(DndError::NotInitialized(contact.id.clone()));
    };

    let entry = settings.0.entry(channel).or_insert_with(DndChannelSetting::default);
    if entry.status != target {
        entry.status = target;
        entry.message = audit_message(target, actor, now);
    }

    contact.recompute_dnd();
    Ok(target)
}

fn audit_message(status: DndStatus, actor: &str, now: DateTime<Utc>) -> String {
    let verb = match status {
        DndStatus::Active => "Activated",
        DndStatus::Inactive => "Deactivated",
    };
    format!(
        "{verb} by {actor} at {}",
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}
