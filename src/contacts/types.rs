use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    #[serde(alias = "locationId")]
    pub business_id: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub additional_emails: Vec<LabeledEmail>,
    #[serde(default)]
    pub additional_phones: Vec<LabeledPhone>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub dnd: bool,
    #[serde(default)]
    pub dnd_settings: Option<DndSettings>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub date_added: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_updated: Option<DateTime<Utc>>,
}

impl Contact {
    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !name.is_empty() {
            return name;
        }
        self.email
            .clone()
            .or_else(|| self.phone.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }

    /// Primary phone first, then the additional ones in their stored order.
    pub fn all_phones(&self) -> Vec<String> {
        self.phone
            .iter()
            .cloned()
            .chain(self.additional_phones.iter().map(|p| p.phone.clone()))
            .collect()
    }

    /// Aggregate DND flag, recomputed from the per-channel settings.
    pub fn recompute_dnd(&mut self) {
        self.dnd = self
            .dnd_settings
            .as_ref()
            .is_some_and(DndSettings::any_active);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledEmail {
    pub email: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledPhone {
    pub phone: String,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DndChannel {
    Call,
    Email,
    #[serde(rename = "SMS")]
    Sms,
    #[serde(rename = "GMB")]
    Gmb,
    #[serde(rename = "FB")]
    Fb,
}

impl DndChannel {
    pub const ALL: [DndChannel; 5] = [
        DndChannel::Call,
        DndChannel::Email,
        DndChannel::Sms,
        DndChannel::Gmb,
        DndChannel::Fb,
    ];
}

impl std::fmt::Display for DndChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Call => write!(f, "Call"),
            Self::Email => write!(f, "Email"),
            Self::Sms => write!(f, "SMS"),
            Self::Gmb => write!(f, "GMB"),
            Self::Fb => write!(f, "FB"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DndStatus {
    Active,
    #[default]
    Inactive,
}

impl DndStatus {
    pub fn toggled(self) -> Self {
        match self {
            Self::Active => Self::Inactive,
            Self::Inactive => Self::Active,
        }
    }
}

impl std::fmt::Display for DndStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DndChannelSetting {
    pub status: DndStatus,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub code: String,
}

/// Per-channel do-not-disturb state, keyed by channel name on the wire
/// (`{"SMS": {"status": "active", ...}}`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DndSettings(pub BTreeMap<DndChannel, DndChannelSetting>);

impl DndSettings {
    pub fn all_inactive() -> Self {
        Self(
            DndChannel::ALL
                .iter()
                .map(|channel| (*channel, DndChannelSetting::default()))
                .collect(),
        )
    }

    pub fn status(&self, channel: DndChannel) -> DndStatus {
        self.0
            .get(&channel)
            .map(|setting| setting.status)
            .unwrap_or_default()
    }

    pub fn any_active(&self) -> bool {
        self.0
            .values()
            .any(|setting| setting.status == DndStatus::Active)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Note {
    pub id: String,
    pub contact_id: String,
    pub body: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub date_added: DateTime<Utc>,
    #[serde(default)]
    pub date_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContactRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub additional_emails: Vec<LabeledEmail>,
    #[serde(default)]
    pub additional_phones: Vec<LabeledPhone>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub source: Option<String>,
    /// Set by bulk import: destination pipeline and its first stage.
    pub pipeline_id: Option<String>,
    pub pipeline_stage_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateContactRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub additional_emails: Option<Vec<LabeledEmail>>,
    pub additional_phones: Option<Vec<LabeledPhone>>,
    pub tags: Option<Vec<String>>,
    pub dnd_settings: Option<DndSettings>,
}

impl UpdateContactRequest {
    pub fn apply_to(self, contact: &mut Contact) {
        if let Some(first_name) = self.first_name {
            contact.first_name = Some(first_name);
        }
        if let Some(last_name) = self.last_name {
            contact.last_name = Some(last_name);
        }
        if let Some(email) = self.email {
            contact.email = Some(email);
        }
        if let Some(phone) = self.phone {
            contact.phone = Some(phone);
        }
        if let Some(emails) = self.additional_emails {
            contact.additional_emails = emails;
        }
        if let Some(phones) = self.additional_phones {
            contact.additional_phones = phones;
        }
        if let Some(tags) = self.tags {
            contact.tags = tags;
        }
        if let Some(settings) = self.dnd_settings {
            contact.dnd_settings = Some(settings);
            contact.recompute_dnd();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactPage {
    pub contacts: Vec<Contact>,
    pub total: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub tag: Option<String>,
    #[serde(default)]
    pub force_refresh: bool,
}

impl ContactListQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(25).clamp(1, 100)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRequest {
    pub body: Option<String>,
}
