//! Sources: bundle lists, detail, multipart create/update, archive
//!
//! Create and update take `multipart/form-data` with these parts:
//! `name`, `source_date`, `summary`, `potential_impact`,
//! `potential_impact_notes`, `link_or_file`, `upload_batch`, `file_upload`
//! (main file), repeated `extra_files`, `extra_links`, `drop_temp_ids`,
//! and on update `remove_item_ids` and `clear_file_upload`.

use axum::{
    extract::{multipart::MultipartError, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracker_common::db::{Source, SourceFileVersion};
use tracker_common::tokens::BatchId;
use uuid::Uuid;

use super::auth::{AdminUser, CurrentUser};
use super::events::{parse_display_type, require_event};
use super::themes::ToggleResponse;
use crate::bundles::{build_bundles, filter_by_type, Bundle, BundleOrder};
use crate::db::{file_versions, sources};
use crate::error::{ApiError, ApiResult};
use crate::forms::{is_mailto, SourceFormInput};
use crate::staging::{extension_of, IncomingFile};
use crate::workflow::{MutationOutcome, SourceSubmission, SourceWorkflow};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SourceListParams {
    /// `name` (default) or `date`
    pub order: Option<String>,
    pub source_type: Option<String>,
    pub include_archived: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FileKind {
    Pdf,
    Doc,
    Email,
    Other,
}

impl FileKind {
    pub fn of(extension: &str) -> Self {
        match extension {
            ".pdf" => FileKind::Pdf,
            ".doc" | ".docx" => FileKind::Doc,
            ".eml" | ".msg" => FileKind::Email,
            _ => FileKind::Other,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LinkItem {
    pub id: i64,
    pub link: String,
    pub is_mailto: bool,
    pub is_active: bool,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct FileItem {
    pub id: i64,
    pub name: String,
    pub extension: String,
    pub kind: FileKind,
    pub is_active: bool,
    pub download_url: String,
}

#[derive(Debug, Serialize)]
pub struct VersionItem {
    pub id: i64,
    pub original_name: String,
    pub created_at: String,
    pub download_url: String,
}

impl From<SourceFileVersion> for VersionItem {
    fn from(version: SourceFileVersion) -> Self {
        Self {
            id: version.id,
            download_url: download_url(&version.download_token),
            original_name: version.original_name,
            created_at: tracker_common::time::format_timestamp(version.created_at),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SourceDetail {
    pub source: Source,
    pub links: Vec<LinkItem>,
    pub files: Vec<FileItem>,
    /// First PDF of the bundle
    pub preview_url: Option<String>,
    pub versions: Vec<VersionItem>,
}

/// Stable external download link for a token
pub fn download_url(token: &Uuid) -> String {
    format!("/f/{}/", token)
}

fn split_members(members: &[Source]) -> (Vec<LinkItem>, Vec<FileItem>) {
    let mut links = Vec::new();
    let mut files = Vec::new();
    for member in members {
        if let Some(name) = member.attached_file_name() {
            let name = name.to_string();
            let extension = extension_of(&name);
            files.push(FileItem {
                id: member.id,
                kind: FileKind::of(&extension),
                name,
                extension,
                is_active: member.is_active,
                download_url: download_url(&member.download_token),
            });
        } else if member.has_link() {
            let link = member.link_or_file.trim().to_string();
            links.push(LinkItem {
                id: member.id,
                is_mailto: is_mailto(&link),
                link,
                is_active: member.is_active,
                download_url: download_url(&member.download_token),
            });
        }
    }
    (links, files)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

fn parse_ids(field: &str, values: &[String]) -> ApiResult<Vec<i64>> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<i64>()
                .map_err(|_| ApiError::BadRequest(format!("{}: '{}' is not an id", field, v)))
        })
        .collect()
}

/// Read a source form from multipart parts
pub async fn read_submission(mut multipart: Multipart) -> ApiResult<SourceSubmission> {
    let mut form = SourceFormInput::default();
    let mut batch: Option<String> = None;
    let mut main_file = None;
    let mut extra_files = Vec::new();
    let mut extra_links = Vec::new();
    let mut drop_temp_ids = Vec::new();
    let mut remove_item_ids = Vec::new();
    let mut clear_main_file = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file_upload" | "extra_files" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                // Browsers send an empty part for an untouched file input
                if file_name.is_empty() && bytes.is_empty() {
                    continue;
                }
                let file = IncomingFile::new(file_name, bytes);
                if name == "file_upload" {
                    main_file = Some(file);
                } else {
                    extra_files.push(file);
                }
            }
            _ => {
                let value = field.text().await.map_err(multipart_error)?;
                match name.as_str() {
                    "name" => form.name = value,
                    "source_date" => form.source_date = value,
                    "summary" => form.summary = value,
                    "potential_impact" => form.potential_impact = value,
                    "potential_impact_notes" => form.potential_impact_notes = value,
                    "link_or_file" => form.link_or_file = value,
                    "upload_batch" => batch = Some(value),
                    "extra_links" => extra_links.push(value),
                    "drop_temp_ids" => drop_temp_ids.push(value),
                    "remove_item_ids" => remove_item_ids.push(value),
                    "clear_file_upload" => {
                        clear_main_file = matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on")
                    }
                    other => debug!(field = other, "Ignoring unknown form field"),
                }
            }
        }
    }

    let mut submission = SourceSubmission::new(BatchId::from_client_or_new(batch.as_deref()), form);
    submission.main_file = main_file;
    submission.extra_files = extra_files;
    submission.extra_links = extra_links;
    submission.drop_temp_ids = parse_ids("drop_temp_ids", &drop_temp_ids)?;
    submission.remove_item_ids = parse_ids("remove_item_ids", &remove_item_ids)?;
    submission.clear_main_file = clear_main_file;
    Ok(submission)
}

/// GET /api/events/:id/sources
pub async fn list_event_sources(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Path(event_id): Path<i64>,
    Query(params): Query<SourceListParams>,
) -> ApiResult<Json<Vec<Bundle>>> {
    let order = match params.order.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<BundleOrder>().map_err(ApiError::BadRequest)?,
        None => BundleOrder::NameAsc,
    };
    let display_type = parse_display_type(params.source_type.as_deref())?;
    require_event(&state, event_id).await?;

    let rows = sources::list_for_event(&state.db, event_id, params.include_archived).await?;
    Ok(Json(filter_by_type(build_bundles(rows, order), display_type)))
}

/// POST /api/events/:id/sources
pub async fn create_source(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Path(event_id): Path<i64>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<MutationOutcome>)> {
    let submission = read_submission(multipart).await?;
    let outcome = SourceWorkflow::from_state(&state)
        .create(event_id, submission, user.id)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /api/sources/:id
pub async fn get_source(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<SourceDetail>> {
    let source = sources::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Source {} not found", id)))?;

    let members = sources::list_bundle(&state.db, &source.bundle_id).await?;
    let (links, files) = split_members(&members);
    let preview_url = files
        .iter()
        .find(|f| f.kind == FileKind::Pdf)
        .map(|f| f.download_url.clone());
    let versions = file_versions::list_for_source(&state.db, id)
        .await?
        .into_iter()
        .map(VersionItem::from)
        .collect();

    Ok(Json(SourceDetail {
        source,
        links,
        files,
        preview_url,
        versions,
    }))
}

/// POST /api/sources/:id
pub async fn update_source(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> ApiResult<Json<MutationOutcome>> {
    let submission = read_submission(multipart).await?;
    let outcome = SourceWorkflow::from_state(&state).update(id, submission, user.id).await?;
    Ok(Json(outcome))
}

/// POST /api/sources/:id/toggle
///
/// Archives or restores a single row, not the whole bundle.
pub async fn toggle_source(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ToggleResponse>> {
    let is_active = sources::toggle_active(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Source {} not found", id)))?;
    info!(source_id = id, user_id = user.id, is_active, "Source toggled");
    Ok(Json(ToggleResponse { id, is_active }))
}

pub fn source_routes() -> Router<AppState> {
    Router::new()
        .route("/api/events/:id/sources", get(list_event_sources).post(create_source))
        .route("/api/sources/:id", get(get_source).post(update_source))
        .route("/api/sources/:id/toggle", post(toggle_source))
}
