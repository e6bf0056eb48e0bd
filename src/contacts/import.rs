//! Four-step spreadsheet import: pick what to import, upload a CSV, map its
//! columns onto contact fields, then verify and submit one batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::types::{CreateContactRequest, LabeledEmail, LabeledPhone};
use crate::pipelines::types::Pipeline;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImportError {
    #[error("Select what to import first")]
    NoObjectSelected,
    #[error("Could not read the spreadsheet: {0}")]
    Parse(String),
    #[error("The spreadsheet has no data rows")]
    EmptyFile,
    #[error("Map at least one phone or email column")]
    MissingContactColumn,
    #[error("Unknown column {0}")]
    UnknownColumn(String),
    #[error("Consent is required before importing")]
    ConsentRequired,
    #[error("Choose a destination pipeline")]
    NoPipeline,
    #[error("Pipeline {0} has no stages")]
    PipelineHasNoStages(String),
    #[error("Not available at step {0}")]
    WrongStep(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportObject {
    Contacts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum WizardStep {
    SelectObject,
    Upload,
    MapColumns,
    Verify,
}

impl WizardStep {
    pub fn number(self) -> u8 {
        match self {
            Self::SelectObject => 1,
            Self::Upload => 2,
            Self::MapColumns => 3,
            Self::Verify => 4,
        }
    }

    fn next(self) -> Option<Self> {
        match self {
            Self::SelectObject => Some(Self::Upload),
            Self::Upload => Some(Self::MapColumns),
            Self::MapColumns => Some(Self::Verify),
            Self::Verify => None,
        }
    }

    fn previous(self) -> Option<Self> {
        match self {
            Self::SelectObject => None,
            Self::Upload => Some(Self::SelectObject),
            Self::MapColumns => Some(Self::Upload),
            Self::Verify => Some(Self::MapColumns),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ContactField {
    FirstName,
    LastName,
    FullName,
    Email,
    Phone,
    Tags,
    Source,
    Ignore,
}

impl ContactField {
    /// Guess from a header like "Mobile Phone" or "E-mail Address".
    pub fn suggest(header: &str) -> Self {
        let key: String = header
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();

        match key.as_str() {
            "firstname" | "first" | "givenname" | "fname" => Self::FirstName,
            "lastname" | "last" | "surname" | "familyname" | "lname" => Self::LastName,
            "name" | "fullname" | "contactname" => Self::FullName,
            "tags" | "tag" | "labels" => Self::Tags,
            "source" | "leadsource" => Self::Source,
            "mail" => Self::Email,
            k if k.contains("email") => Self::Email,
            k if k.contains("phone")
                || k.contains("mobile")
                || k.contains("cell")
                || k.starts_with("tel") =>
            {
                Self::Phone
            }
            _ => Self::Ignore,
        }
    }
}

/// Header name to contact field.
pub type ColumnMapping = BTreeMap<String, ContactField>;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ParsedSheet {
    pub fn parse(input: &str) -> Result<Self, ImportError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(input.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| ImportError::Parse(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            return Err(ImportError::EmptyFile);
        }

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| ImportError::Parse(e.to_string()))?;
            if record.iter().all(str::is_empty) {
                continue;
            }
            rows.push(record.iter().map(str::to_string).collect());
        }

        if rows.is_empty() {
            return Err(ImportError::EmptyFile);
        }
        Ok(Self { headers, rows })
    }

    pub fn suggested_mapping(&self) -> ColumnMapping {
        self.headers
            .iter()
            .filter(|h| !h.is_empty())
            .map(|h| (h.clone(), ContactField::suggest(h)))
            .collect()
    }

    fn row_to_contact(&self, row: &[String], mapping: &ColumnMapping) -> CreateContactRequest {
        let mut contact = CreateContactRequest::default();
        for (header, value) in self.headers.iter().zip(row.iter()) {
            if value.is_empty() {
                continue;
            }
            match mapping.get(header).copied().unwrap_or(ContactField::Ignore) {
                ContactField::FirstName => contact.first_name = Some(value.clone()),
                ContactField::LastName => contact.last_name = Some(value.clone()),
                ContactField::FullName => {
                    let mut parts = value.splitn(2, char::is_whitespace);
                    contact.first_name = parts.next().map(str::to_string);
                    contact.last_name = parts
                        .next()
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string);
                }
                ContactField::Email if contact.email.is_none() => {
                    contact.email = Some(value.clone())
                }
                ContactField::Email => contact.additional_emails.push(LabeledEmail {
                    email: value.clone(),
                    label: Some(header.clone()),
                }),
                ContactField::Phone if contact.phone.is_none() => {
                    contact.phone = Some(value.clone())
                }
                ContactField::Phone => contact.additional_phones.push(LabeledPhone {
                    phone: value.clone(),
                    label: Some(header.clone()),
                }),
                ContactField::Tags => contact.tags.extend(
                    value
                        .split([',', ';'])
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string),
                ),
                ContactField::Source => contact.source = Some(value.clone()),
                ContactField::Ignore => {}
            }
        }
        contact
    }

    /// Rows that carry a phone or an email under `mapping`.
    pub fn valid_contacts(&self, mapping: &ColumnMapping) -> Vec<CreateContactRequest> {
        self.rows
            .iter()
            .map(|row| self.row_to_contact(row, mapping))
            .filter(|c| c.phone.is_some() || c.email.is_some())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub input_rows: usize,
    pub valid_rows: usize,
    pub dropped_rows: usize,
}

/// The single call the wizard produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkContactBatch {
    pub pipeline_id: String,
    pub pipeline_stage_id: String,
    pub contacts: Vec<CreateContactRequest>,
}

#[derive(Debug, Clone)]
pub struct ImportWizard {
    step: WizardStep,
    object: Option<ImportObject>,
    sheet: Option<ParsedSheet>,
    mapping: ColumnMapping,
    consent: bool,
    pipeline: Option<Pipeline>,
}

impl Default for ImportWizard {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportWizard {
    pub fn new() -> Self {
        Self {
            step: WizardStep::SelectObject,
            object: None,
            sheet: None,
            mapping: ColumnMapping::new(),
            consent: false,
            pipeline: None,
        }
    }

    pub fn step(&self) -> WizardStep {
        self.step
    }

    pub fn mapping(&self) -> &ColumnMapping {
        &self.mapping
    }

    pub fn sheet(&self) -> Option<&ParsedSheet> {
        self.sheet.as_ref()
    }

    fn require_step(&self, step: WizardStep) -> Result<(), ImportError> {
        if self.step == step {
            Ok(())
        } else {
            Err(ImportError::WrongStep(self.step.number()))
        }
    }

    pub fn select_object(&mut self, object: ImportObject) -> Result<(), ImportError> {
        self.require_step(WizardStep::SelectObject)?;
        self.object = Some(object);
        Ok(())
    }

    /// Parses the file and replaces the mapping with suggestions for its
    /// headers. A failed parse clears any earlier upload.
    pub fn upload(&mut self, csv: &str) -> Result<ImportSummary, ImportError> {
        self.require_step(WizardStep::Upload)?;
        match ParsedSheet::parse(csv) {
            Ok(sheet) => {
                self.mapping = sheet.suggested_mapping();
                self.sheet = Some(sheet);
                Ok(self.summary())
            }
            Err(err) => {
                self.sheet = None;
                self.mapping.clear();
                Err(err)
            }
        }
    }

    pub fn map_column(&mut self, header: &str, field: ContactField) -> Result<(), ImportError> {
        self.require_step(WizardStep::MapColumns)?;
        match self.mapping.get_mut(header) {
            Some(current) => {
                *current = field;
                Ok(())
            }
            None => Err(ImportError::UnknownColumn(header.to_string())),
        }
    }

    fn has_contact_column(&self) -> bool {
        self.mapping
            .values()
            .any(|f| matches!(f, ContactField::Phone | ContactField::Email))
    }

    /// Advances one step if the current step is complete; otherwise the step
    /// stays where it is.
    pub fn next(&mut self) -> Result<WizardStep, ImportError> {
        match self.step {
            WizardStep::SelectObject if self.object.is_none() => {
                return Err(ImportError::NoObjectSelected)
            }
            WizardStep::Upload if self.sheet.is_none() => return Err(ImportError::EmptyFile),
            WizardStep::MapColumns if !self.has_contact_column() => {
                return Err(ImportError::MissingContactColumn)
            }
            _ => {}
        }
        let next = self
            .step
            .next()
            .ok_or(ImportError::WrongStep(self.step.number()))?;
        self.step = next;
        Ok(next)
    }

    pub fn back(&mut self) -> Result<WizardStep, ImportError> {
        let previous = self
            .step
            .previous()
            .ok_or(ImportError::WrongStep(self.step.number()))?;
        self.step = previous;
        Ok(previous)
    }

    pub fn set_consent(&mut self, consent: bool) {
        self.consent = consent;
    }

    pub fn select_pipeline(&mut self, pipeline: Pipeline) {
        self.pipeline = Some(pipeline);
    }

    pub fn summary(&self) -> ImportSummary {
        let Some(sheet) = self.sheet.as_ref() else {
            return ImportSummary {
                input_rows: 0,
                valid_rows: 0,
                dropped_rows: 0,
            };
        };
        let input_rows = sheet.rows.len();
        let valid_rows = sheet.valid_contacts(&self.mapping).len();
        ImportSummary {
            input_rows,
            valid_rows,
            dropped_rows: input_rows - valid_rows,
        }
    }

    /// Builds the batch for every valid row, each tagged with the pipeline
    /// and its position-zero stage.
    pub fn submit(&self) -> Result<BulkContactBatch, ImportError> {
        self.require_step(WizardStep::Verify)?;
        if !self.consent {
            return Err(ImportError::ConsentRequired);
        }
        let pipeline = self.pipeline.as_ref().ok_or(ImportError::NoPipeline)?;
        let stage = pipeline
            .first_stage()
            .ok_or_else(|| ImportError::PipelineHasNoStages(pipeline.id.clone()))?;
        let sheet = self.sheet.as_ref().ok_or(ImportError::EmptyFile)?;

        let contacts = sheet
            .valid_contacts(&self.mapping)
            .into_iter()
            .map(|contact| CreateContactRequest {
                pipeline_id: Some(pipeline.id.clone()),
                pipeline_stage_id: Some(stage.id.clone()),
                source: contact.source.clone().or_else(|| Some("csv import".to_string())),
                ..contact
            })
            .collect();

        Ok(BulkContactBatch {
            pipeline_id: pipeline.id.clone(),
            pipeline_stage_id: stage.id.clone(),
            contacts,
        })
    }
}
