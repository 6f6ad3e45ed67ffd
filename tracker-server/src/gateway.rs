//! Secure Download Gateway
//!
//! `GET /f/<token>/` maps an opaque download token to the object it names.
//! Per request: parse the token (400), require a user (403, before any
//! lookup so existence is never revealed), resolve against current sources
//! then file history (404), apply the download policy (403), then serve.
//!
//! Serving picks a strategy from backend capability only: a backend that
//! hands out URLs gets a 302 to that URL, otherwise the bytes are streamed
//! as an attachment. Link sources redirect to the link itself. Every served
//! request writes one DownloadLog row; a failed log write never blocks it.

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use tracker_common::db::{Source, SourceFileVersion, User};
use tracker_common::tokens::parse_download_token;
use uuid::Uuid;

use crate::db::audit::{self, NewDownloadLog};
use crate::db::{file_versions, sources};
use crate::error::{ApiError, ApiResult};
use crate::storage::{BlobStorage, StorageError};
use crate::AppState;

/// What a token points at
#[derive(Debug, Clone)]
pub enum ResolvedDownload {
    Current(Source),
    History(SourceFileVersion),
}

impl ResolvedDownload {
    /// Owning source row id
    pub fn source_id(&self) -> i64 {
        match self {
            ResolvedDownload::Current(source) => source.id,
            ResolvedDownload::History(version) => version.source_id,
        }
    }

    fn target(&self) -> Target {
        match self {
            ResolvedDownload::Current(source) => match &source.file_upload {
                Some(key) => Target::File {
                    key: key.clone(),
                    file_name: source.attached_file_name().unwrap_or_default().to_string(),
                },
                None if !source.link_or_file.trim().is_empty() => Target::Link(source.link_or_file.trim().to_string()),
                None => Target::Nothing,
            },
            ResolvedDownload::History(version) => Target::File {
                key: version.file.clone(),
                file_name: version.original_name.clone(),
            },
        }
    }
}

enum Target {
    File { key: String, file_name: String },
    Link(String),
    Nothing,
}

/// Who may download what, beyond being signed in
pub trait DownloadPolicy: Send + Sync {
    fn authorize(&self, user: &User, resolved: &ResolvedDownload) -> bool;
}

/// Any active signed-in user; archived sources stay downloadable
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthenticatedOnly;

impl DownloadPolicy for AuthenticatedOnly {
    fn authorize(&self, user: &User, _resolved: &ResolvedDownload) -> bool {
        user.is_active
    }
}

/// Request context recorded in the download log
#[derive(Debug, Clone, Copy)]
pub struct Requester<'a> {
    pub user: Option<&'a User>,
    pub ip: Option<&'a str>,
    pub user_agent: &'a str,
}

/// Current source first, then file history
pub async fn resolve(db: &sqlx::SqlitePool, token: &Uuid) -> ApiResult<Option<ResolvedDownload>> {
    if let Some(source) = sources::get_by_token(db, token).await? {
        return Ok(Some(ResolvedDownload::Current(source)));
    }
    Ok(file_versions::get_by_token(db, token)
        .await?
        .map(ResolvedDownload::History))
}

/// Full request handling for one raw token
pub async fn download(state: &AppState, raw_token: &str, requester: Requester<'_>) -> ApiResult<Response> {
    let token = parse_download_token(raw_token)
        .map_err(|_| ApiError::BadRequest("Malformed download token".to_string()))?;

    let user = requester.user.ok_or_else(|| ApiError::Forbidden("Sign in to download files".to_string()))?;

    let resolved = resolve(&state.db, &token)
        .await?
        .ok_or_else(|| ApiError::NotFound("Unknown download token".to_string()))?;

    if !state.download_policy.authorize(user, &resolved) {
        warn!(user_id = user.id, token = %token, "Download denied by policy");
        return Err(ApiError::Forbidden("Download not permitted".to_string()));
    }

    match resolved.target() {
        Target::File { key, file_name } => serve_file(state, &token, &key, &file_name, requester).await,
        Target::Link(link) => {
            record(state, &token, &link, requester).await;
            Ok(redirect(&link))
        }
        Target::Nothing => Err(ApiError::NotFound("Nothing attached to this source".to_string())),
    }
}

async fn serve_file(
    state: &AppState,
    token: &Uuid,
    key: &str,
    file_name: &str,
    requester: Requester<'_>,
) -> ApiResult<Response> {
    let storage: &dyn BlobStorage = state.storage.as_ref();

    if let Some(url) = storage.url(key) {
        record(state, token, key, requester).await;
        debug!(key, "Redirecting download to storage URL");
        return Ok(redirect(&url));
    }

    let blob = storage.open(key).await.map_err(|e| match e {
        StorageError::NotFound(_) => ApiError::NotFound("File is missing from storage".to_string()),
        other => ApiError::Storage(other),
    })?;

    record(state, token, key, requester).await;

    let mime = mime_guess::from_path(file_name).first_or_octet_stream();
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_DISPOSITION, content_disposition(file_name));
    if let Some(len) = blob.len {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    builder
        .body(Body::from_stream(ReaderStream::new(blob.reader)))
        .map_err(|e| ApiError::Internal(format!("Failed to build download response: {}", e)))
}

/// Best-effort audit row; failures are logged and swallowed
async fn record(state: &AppState, token: &Uuid, object_key: &str, requester: Requester<'_>) {
    let token_str = token.to_string();
    let entry = NewDownloadLog {
        user_id: requester.user.map(|u| u.id),
        ip: requester.ip,
        user_agent: requester.user_agent,
        object_key,
        token: &token_str,
    };
    match audit::record_download(&state.db, &entry).await {
        Ok(_) => info!(token = %token, object_key, user_id = ?entry.user_id, "Download served"),
        Err(e) => warn!(token = %token, object_key, "Failed to write download log: {}", e),
    }
}

fn redirect(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => ApiError::Internal(format!("Unusable redirect target: {}", location)).into_response(),
    }
}

/// `attachment; filename="..."` with quotes and control characters removed
fn content_disposition(file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| if c == '"' || c == '\\' || c.is_control() || !c.is_ascii() { '_' } else { c })
        .collect();
    format!("attachment; filename=\"{}\"", safe)
}
