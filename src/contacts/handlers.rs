use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::Utc;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::dnd::{initialize_dnd, set_dnd, toggle_dnd};
use super::import::{ColumnMapping, ImportObject, ImportSummary, ImportWizard, ParsedSheet};
use super::types::{
    Contact, ContactListQuery, ContactPage, CreateContactRequest, DndChannel, DndStatus, Note,
    NoteRequest, UpdateContactRequest,
};
use crate::core::auth::AuthContext;
use crate::core::error::{ApiError, ApiResponse, ApiResult};
use crate::core::state::AppState;

#[derive(Debug, Serialize)]
pub struct ContactBody {
    pub contact: Contact,
}

#[derive(Debug, Serialize)]
pub struct DeletedBody {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct NotesBody {
    pub notes: Vec<Note>,
}

#[derive(Debug, Serialize)]
pub struct NoteBody {
    pub note: Note,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DndUpdateRequest {
    pub channel: Option<DndChannel>,
    /// Target state; omitted means toggle.
    pub status: Option<DndStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreviewRequest {
    pub csv: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreviewBody {
    pub headers: Vec<String>,
    pub mapping: ColumnMapping,
    #[serde(flatten)]
    pub summary: ImportSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRequest {
    pub object_type: Option<ImportObject>,
    pub csv: Option<String>,
    #[serde(default)]
    pub mapping: ColumnMapping,
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub consent: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBody {
    pub created: usize,
    #[serde(flatten)]
    pub summary: ImportSummary,
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

async fn invalidate_pages(state: &AppState, business_id: &str) {
    state
        .contacts_cache
        .invalidate_where(|(business, ..)| business == business_id)
        .await;
}

pub async fn list_contacts(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Query(query): Query<ContactListQuery>,
) -> ApiResult<ContactPage> {
    let business_id = auth.business_id();
    let key = (
        business_id.to_string(),
        query.page(),
        query.limit(),
        query.tag.clone(),
    );

    if !query.force_refresh {
        if let Some(page) = state.contacts_cache.get(&key).await {
            return Ok(ApiResponse::ok(page));
        }
    }

    let page = state
        .crm
        .list_contacts(business_id, query.page(), query.limit(), query.tag.as_deref())
        .await
        .map_err(|e| {
            error!("Failed to list contacts for {business_id}: {e}");
            ApiError::from(e)
        })?;

    state.contacts_cache.insert(key, page.clone()).await;
    Ok(ApiResponse::ok(page))
}

pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<CreateContactRequest>,
) -> ApiResult<ContactBody> {
    if !non_empty(&req.first_name) && !non_empty(&req.last_name) {
        return Err(ApiError::missing("firstName"));
    }
    if !non_empty(&req.email) && !non_empty(&req.phone) {
        return Err(ApiError::Validation(
            "A contact needs an email or a phone number".to_string(),
        ));
    }

    let business_id = auth.business_id();
    let contact = state
        .crm
        .create_contact(business_id, &req)
        .await
        .map_err(|e| {
            error!("Failed to create contact for {business_id}: {e}");
            ApiError::from(e)
        })?;

    invalidate_pages(&state, business_id).await;
    info!("Created contact {} for {}", contact.id, business_id);
    Ok(ApiResponse::ok(ContactBody { contact }))
}

pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<ContactBody> {
    let contact = state.crm.get_contact(auth.business_id(), &id).await?;
    Ok(ApiResponse::ok(ContactBody { contact }))
}

pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<UpdateContactRequest>,
) -> ApiResult<ContactBody> {
    let business_id = auth.business_id();
    let mut contact = state.crm.get_contact(business_id, &id).await?;
    req.apply_to(&mut contact);

    let contact = state
        .crm
        .update_contact(business_id, &contact)
        .await
        .map_err(|e| {
            error!("Failed to update contact {id}: {e}");
            ApiError::from(e)
        })?;

    invalidate_pages(&state, business_id).await;
    Ok(ApiResponse::ok(ContactBody { contact }))
}

pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<DeletedBody> {
    let business_id = auth.business_id();
    state.crm.delete_contact(business_id, &id).await.map_err(|e| {
        error!("Failed to delete contact {id}: {e}");
        ApiError::from(e)
    })?;

    invalidate_pages(&state, business_id).await;
    info!("Deleted contact {id} for {business_id}");
    Ok(ApiResponse::ok(DeletedBody { id }))
}

/// Initializes settings if the contact has none, then moves one channel.
pub async fn update_dnd(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<DndUpdateRequest>,
) -> ApiResult<ContactBody> {
    let channel = req.channel.ok_or_else(|| ApiError::missing("channel"))?;
    let business_id = auth.business_id();
    let mut contact = state.crm.get_contact(business_id, &id).await?;

    if initialize_dnd(&mut contact) {
        info!("Initialized DND settings for contact {id}");
    }

    let now = Utc::now();
    let status = match req.status {
        Some(target) => set_dnd(&mut contact, channel, target, auth.actor_name(), now)?,
        None => toggle_dnd(&mut contact, channel, auth.actor_name(), now)?,
    };

    let contact = state
        .crm
        .update_contact(business_id, &contact)
        .await
        .map_err(|e| {
            error!("Failed to persist DND for contact {id}: {e}");
            ApiError::from(e)
        })?;

    invalidate_pages(&state, business_id).await;
    info!("DND {channel} for contact {id} is now {status}");
    Ok(ApiResponse::ok(ContactBody { contact }))
}

pub async fn list_notes(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<String>,
) -> ApiResult<NotesBody> {
    let notes = state.crm.list_notes(auth.business_id(), &id).await?;
    Ok(ApiResponse::ok(NotesBody { notes }))
}

fn note_body(req: &NoteRequest) -> Result<&str, ApiError> {
    req.body
        .as_deref()
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ApiError::missing("body"))
}

pub async fn create_note(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(id): Path<String>,
    Json(req): Json<NoteRequest>,
) -> ApiResult<NoteBody> {
    let body = note_body(&req)?;
    let note = state
        .crm
        .create_note(auth.business_id(), &id, body, &auth.0.user_id)
        .await
        .map_err(|e| {
            error!("Failed to add note to contact {id}: {e}");
            ApiError::from(e)
        })?;
    Ok(ApiResponse::ok(NoteBody { note }))
}

pub async fn update_note(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((id, note_id)): Path<(String, String)>,
    Json(req): Json<NoteRequest>,
) -> ApiResult<NoteBody> {
    let body = note_body(&req)?;
    let note = state
        .crm
        .update_note(auth.business_id(), &id, &note_id, body, &auth.0.user_id)
        .await?;
    Ok(ApiResponse::ok(NoteBody { note }))
}

pub async fn delete_note(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path((id, note_id)): Path<(String, String)>,
) -> ApiResult<DeletedBody> {
    state
        .crm
        .delete_note(auth.business_id(), &id, &note_id)
        .await?;
    Ok(ApiResponse::ok(DeletedBody { id: note_id }))
}

pub async fn preview_import(
    _auth: AuthContext,
    Json(req): Json<ImportPreviewRequest>,
) -> ApiResult<ImportPreviewBody> {
    let csv = req.csv.ok_or_else(|| ApiError::missing("csv"))?;
    let sheet = ParsedSheet::parse(&csv)?;
    let mapping = sheet.suggested_mapping();

    let input_rows = sheet.rows.len();
    let valid_rows = sheet.valid_contacts(&mapping).len();
    Ok(ApiResponse::ok(ImportPreviewBody {
        headers: sheet.headers,
        mapping,
        summary: ImportSummary {
            input_rows,
            valid_rows,
            dropped_rows: input_rows - valid_rows,
        },
    }))
}

/// Runs the whole wizard server-side and issues one batch call.
pub async fn import_contacts(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Json(req): Json<ImportRequest>,
) -> ApiResult<ImportBody> {
    let csv = req.csv.ok_or_else(|| ApiError::missing("csv"))?;
    let pipeline_id = req
        .pipeline_id
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::missing("pipelineId"))?;
    let business_id = auth.business_id();

    let mut wizard = ImportWizard::new();
    wizard.select_object(req.object_type.unwrap_or(ImportObject::Contacts))?;
    wizard.next()?;
    wizard.upload(&csv)?;
    wizard.next()?;
    for (header, field) in req.mapping {
        wizard.map_column(&header, field)?;
    }
    wizard.next()?;
    wizard.set_consent(req.consent);

    let pipeline = state
        .crm
        .list_pipelines(business_id)
        .await?
        .into_iter()
        .find(|p| p.id == pipeline_id)
        .ok_or_else(|| ApiError::NotFound(format!("pipeline {pipeline_id}")))?;
    wizard.select_pipeline(pipeline);

    let batch = wizard.submit()?;
    let summary = wizard.summary();
    if summary.dropped_rows > 0 {
        warn!(
            "Import for {business_id} dropped {} rows without phone or email",
            summary.dropped_rows
        );
    }

    let created = state
        .crm
        .create_contacts_batch(business_id, &batch)
        .await
        .map_err(|e| {
            error!("Bulk import failed for {business_id}: {e}");
            ApiError::from(e)
        })?;

    invalidate_pages(&state, business_id).await;
    info!("Imported {created} contacts into pipeline {pipeline_id} for {business_id}");
    Ok(ApiResponse::ok(ImportBody { created, summary }))
}

pub fn configure_contacts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/contacts", get(list_contacts).post(create_contact))
        .route("/api/contacts/import/preview", post(preview_import))
        .route("/api/contacts/import", post(import_contacts))
        .route(
            "/api/contacts/:id",
            get(get_contact).put(update_contact).delete(delete_contact),
        )
        .route("/api/contacts/:id/dnd", put(update_dnd))
        .route("/api/contacts/:id/notes", get(list_notes).post(create_note))
        .route(
            "/api/contacts/:id/notes/:note_id",
            put(update_note).delete(delete_note),
        )
}
