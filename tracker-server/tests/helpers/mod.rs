//! Shared fixtures for tracker-server integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request};
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tracker_common::db::{init_database, EventStatus, OnsetTimeline, RiskRating, User};
use tracker_common::time::parse_date;
use tracker_common::tokens::BatchId;
use tracker_server::db::events::{self, EventInput};
use tracker_server::db::themes::{self, NewTheme};
use tracker_server::db::users::{self, NewUser};
use tracker_server::db::sessions;
use tracker_server::forms::SourceFormInput;
use tracker_server::staging::{IncomingFile, UploadPolicy};
use tracker_server::storage::{BlobStorage, LocalStorage};
use tracker_server::workflow::{SourceSubmission, SourceWorkflow};
use tracker_server::AppState;

pub const PDF_BYTES: &[u8] = b"%PDF-1.4 test document";

/// Temporary database and media folder with one admin, theme and event
pub struct TestEnv {
    pub dir: TempDir,
    pub db: SqlitePool,
    pub storage: Arc<LocalStorage>,
    pub policy: UploadPolicy,
    pub admin: User,
    pub theme_id: i64,
    pub event_id: i64,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = init_database(&dir.path().join("tracker.db")).await.unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path().join("media")));

        let admin = create_user(&db, "admin", true, true).await;
        let theme_id = create_theme(&db, "Vendor risk").await;
        let event_id = create_event(&db, theme_id, "E1").await;

        Self {
            dir,
            db,
            storage,
            policy: UploadPolicy::default(),
            admin,
            theme_id,
            event_id,
        }
    }

    pub fn workflow(&self) -> SourceWorkflow<'_> {
        SourceWorkflow::new(&self.db, self.storage.as_ref(), &self.policy)
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.db.clone(), self.storage.clone() as Arc<dyn BlobStorage>)
    }

    pub fn media_root(&self) -> &Path {
        self.storage.root()
    }

    pub async fn session_for(&self, user: &User) -> String {
        sessions::create(&self.db, user.id, chrono::Duration::hours(1)).await.unwrap()
    }
}

pub async fn create_user(db: &SqlitePool, username: &str, is_staff: bool, is_superuser: bool) -> User {
    let id = users::create_user(
        db,
        &NewUser {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            password: "correct horse".to_string(),
            is_staff,
            is_superuser,
        },
    )
    .await
    .unwrap();
    users::get(db, id).await.unwrap().unwrap()
}

pub async fn create_theme(db: &SqlitePool, name: &str) -> i64 {
    let category_id = themes::list_categories(db).await.unwrap()[0].id;
    themes::insert(
        db,
        &NewTheme {
            category_id,
            name: name.to_string(),
            description: String::new(),
            risk_rating: RiskRating::High,
            onset_timeline: OnsetTimeline::ShortTerm,
        },
        None,
    )
    .await
    .unwrap()
}

pub async fn create_event(db: &SqlitePool, theme_id: i64, name: &str) -> i64 {
    events::insert(
        db,
        &EventInput {
            theme_id,
            name: name.to_string(),
            description: "Test event".to_string(),
            date_identified: parse_date("2024-01-05").unwrap(),
            risk_rating: RiskRating::High,
            status: EventStatus::Open,
            control_in_place: false,
            risk_taxonomy_lv1: vec!["OPERATIONAL".to_string()],
            risk_taxonomy_lv2: Vec::new(),
            risk_taxonomy_lv3: Vec::new(),
            impacted_lines: vec!["RETAIL".to_string()],
        },
        None,
    )
    .await
    .unwrap()
}

pub fn form(name: &str, summary: &str, link: &str) -> SourceFormInput {
    SourceFormInput {
        name: name.to_string(),
        source_date: "2024-01-10".to_string(),
        summary: summary.to_string(),
        potential_impact: String::new(),
        potential_impact_notes: String::new(),
        link_or_file: link.to_string(),
    }
}

pub fn submission(form: SourceFormInput) -> SourceSubmission {
    SourceSubmission::new(BatchId::generate(), form)
}

pub fn pdf(name: &str) -> IncomingFile {
    IncomingFile::new(name, PDF_BYTES.to_vec())
}

pub async fn count_sources(db: &SqlitePool, event_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM sources WHERE event_id = ?")
        .bind(event_id)
        .fetch_one(db)
        .await
        .unwrap()
}

pub async fn count_staged(db: &SqlitePool, batch: &BatchId) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM temp_uploads WHERE batch_id = ?")
        .bind(batch.to_string())
        .fetch_one(db)
        .await
        .unwrap()
}

/// Regular files below `dir`, recursively
pub fn count_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            let path = entry.path();
            if path.is_dir() {
                count_files(&path)
            } else {
                1
            }
        })
        .sum()
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub const BOUNDARY: &str = "tracker-test-boundary";

/// Hand-built multipart body: text fields, then `(field, file name, bytes)`
pub fn multipart_request(
    uri: &str,
    token: &str,
    fields: &[(&str, &str)],
    files: &[(&str, &str, &[u8])],
) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    for (name, file_name, bytes) in files {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, name, file_name
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
