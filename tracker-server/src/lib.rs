//! tracker-server library
//!
//! HTTP service for the risk tracker: themes, events and their evidence
//! sources, grouped into bundles, with staged uploads and token-based
//! downloads.

use std::sync::Arc;

use axum::{extract::DefaultBodyLimit, Router};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod bundles;
pub mod db;
pub mod error;
pub mod forms;
pub mod gateway;
pub mod permissions;
pub mod staging;
pub mod storage;
pub mod workflow;

use gateway::{AuthenticatedOnly, DownloadPolicy};
use staging::UploadPolicy;
use storage::BlobStorage;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub storage: Arc<dyn BlobStorage>,
    pub uploads: Arc<UploadPolicy>,
    pub download_policy: Arc<dyn DownloadPolicy>,
    pub session_ttl: chrono::Duration,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    /// Default upload policy, authenticated-only downloads, 12 hour sessions
    pub fn new(db: SqlitePool, storage: Arc<dyn BlobStorage>) -> Self {
        Self {
            db,
            storage,
            uploads: Arc::new(UploadPolicy::default()),
            download_policy: Arc::new(AuthenticatedOnly),
            session_ttl: chrono::Duration::hours(12),
            startup_time: Utc::now(),
        }
    }

    pub fn with_upload_policy(mut self, policy: UploadPolicy) -> Self {
        self.uploads = Arc::new(policy);
        self
    }

    pub fn with_download_policy(mut self, policy: Arc<dyn DownloadPolicy>) -> Self {
        self.download_policy = policy;
        self
    }

    pub fn with_session_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.session_ttl = ttl;
        self
    }
}

/// Build application router
///
/// `max_request_bytes` caps whole request bodies (multipart forms carry
/// several files); the per-file limit is enforced by the upload policy.
pub fn build_router(state: AppState, max_request_bytes: usize) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::auth_routes())
        .merge(api::taxonomy_routes())
        .merge(api::theme_routes())
        .merge(api::event_routes())
        .merge(api::source_routes())
        .merge(api::upload_routes())
        .merge(api::download_routes())
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
