//! Upload Staging Area
//!
//! Files posted with a form are held here, keyed by an unguessable batch
//! id, until the surrounding submission commits. A validation failure
//! leaves them in place so the next attempt can reuse them. Batches that
//! are never submitted are purged once they outlive the staging TTL.
//!
//! Staging never fails because of a bad file: files with a disallowed
//! extension or over the size limit are skipped and reported back as
//! rejections for the caller to surface.

use axum::body::Bytes;
use serde::Serialize;
use sqlx::SqlitePool;
use std::fmt;
use tracing::{debug, info, warn};
use tracker_common::config::UploadConfig;
use tracker_common::db::{TempUpload, UploadKind};
use tracker_common::time::now;
use tracker_common::tokens::BatchId;

use crate::db::temp_uploads::{self, NewTempUpload};
use crate::error::ApiResult;
use crate::storage::{staging_key, BlobStorage};

/// Which files may be staged or attached
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    /// Lower-case, with leading dot
    pub allowed_extensions: Vec<String>,
    pub max_upload_bytes: u64,
}

impl UploadPolicy {
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            allowed_extensions: config.allowed_extensions.clone(),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn check(&self, file_name: &str, size: u64) -> Result<(), Rejection> {
        let extension = extension_of(file_name);
        if !self.allowed_extensions.iter().any(|allowed| *allowed == extension) {
            return Err(Rejection::Extension {
                file_name: file_name.to_string(),
                extension,
            });
        }
        if size > self.max_upload_bytes {
            return Err(Rejection::TooLarge {
                file_name: file_name.to_string(),
                size,
                max: self.max_upload_bytes,
            });
        }
        Ok(())
    }

    /// `pdf, doc, docx` style list for messages
    pub fn allowed_list(&self) -> String {
        let mut names: Vec<&str> = self
            .allowed_extensions
            .iter()
            .map(|e| e.trim_start_matches('.'))
            .collect();
        names.sort_unstable();
        names.join(", ")
    }
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// Lower-cased extension including the dot, empty when there is none
pub fn extension_of(file_name: &str) -> String {
    let base = file_name.rsplit(['/', '\\']).next().unwrap_or(file_name);
    match base.rfind('.') {
        Some(dot) if dot > 0 => base[dot..].to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// A file skipped by staging
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    Extension { file_name: String, extension: String },
    TooLarge { file_name: String, size: u64, max: u64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Extension { file_name, extension } if extension.is_empty() => {
                write!(f, "'{}' was skipped: files without an extension are not allowed", file_name)
            }
            Rejection::Extension { file_name, extension } => {
                write!(f, "'{}' was skipped: extension {} is not allowed", file_name, extension)
            }
            Rejection::TooLarge { file_name, max, .. } => write!(
                f,
                "'{}' was skipped: file too large (max {} MB)",
                file_name,
                (*max as f64 / 1024.0 / 1024.0).round()
            ),
        }
    }
}

/// A file part received with the current request
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub bytes: Bytes,
}

impl IncomingFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }
}

/// Result of one `stage` call
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageReport {
    /// Row id of the staged MAIN file when one was staged by this call
    pub main_id: Option<i64>,
    pub extra_ids: Vec<i64>,
    pub rejected: Vec<Rejection>,
}

/// Current contents of a batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct StagedFiles {
    pub main: Option<TempUpload>,
    pub extras: Vec<TempUpload>,
}

impl StagedFiles {
    pub fn count(&self) -> usize {
        self.extras.len() + usize::from(self.main.is_some())
    }

    pub fn all(&self) -> impl Iterator<Item = &TempUpload> {
        self.main.iter().chain(self.extras.iter())
    }
}

pub struct StagingArea<'a> {
    db: &'a SqlitePool,
    storage: &'a dyn BlobStorage,
    policy: &'a UploadPolicy,
}

impl<'a> StagingArea<'a> {
    pub fn new(db: &'a SqlitePool, storage: &'a dyn BlobStorage, policy: &'a UploadPolicy) -> Self {
        Self { db, storage, policy }
    }

    /// Stage the files of one request under `batch`
    ///
    /// A new MAIN file replaces any MAIN already staged for the batch.
    pub async fn stage(
        &self,
        batch: &BatchId,
        user_id: Option<i64>,
        main: Option<IncomingFile>,
        extras: Vec<IncomingFile>,
    ) -> ApiResult<StageReport> {
        let batch_id = batch.to_string();
        let mut report = StageReport::default();

        if let Some(file) = main {
            match self.policy.check(&file.file_name, file.bytes.len() as u64) {
                Ok(()) => report.main_id = Some(self.replace_main(&batch_id, user_id, file).await?),
                Err(rejection) => report.rejected.push(rejection),
            }
        }

        for file in extras {
            match self.policy.check(&file.file_name, file.bytes.len() as u64) {
                Ok(()) => {
                    let key = self.storage.save(&staging_key(&batch_id, &file.file_name), file.bytes.clone()).await?;
                    let id = temp_uploads::insert(
                        self.db,
                        &NewTempUpload {
                            batch_id: &batch_id,
                            kind: UploadKind::Extra,
                            file: &key,
                            original_name: &file.file_name,
                            size_bytes: file.bytes.len() as i64,
                            user_id,
                        },
                    )
                    .await?;
                    report.extra_ids.push(id);
                }
                Err(rejection) => report.rejected.push(rejection),
            }
        }

        for rejection in &report.rejected {
            info!(batch_id = %batch_id, "{}", rejection);
        }
        debug!(
            batch_id = %batch_id,
            main = report.main_id.is_some(),
            extras = report.extra_ids.len(),
            "Staged uploads"
        );
        Ok(report)
    }

    async fn replace_main(&self, batch_id: &str, user_id: Option<i64>, file: IncomingFile) -> ApiResult<i64> {
        let key = self.storage.save(&staging_key(batch_id, &file.file_name), file.bytes.clone()).await?;

        let mut tx = self.db.begin().await?;
        let previous = temp_uploads::delete_main(&mut *tx, batch_id).await?;
        let id = temp_uploads::insert(
            &mut *tx,
            &NewTempUpload {
                batch_id,
                kind: UploadKind::Main,
                file: &key,
                original_name: &file.file_name,
                size_bytes: file.bytes.len() as i64,
                user_id,
            },
        )
        .await?;
        tx.commit().await?;

        if let Some(previous) = previous {
            self.discard_blob(&previous.file).await;
        }
        Ok(id)
    }

    pub async fn get_staged(&self, batch: &BatchId) -> ApiResult<StagedFiles> {
        let rows = temp_uploads::list_batch(self.db, &batch.to_string()).await?;
        let mut staged = StagedFiles::default();
        for row in rows {
            match row.kind {
                UploadKind::Main => staged.main = Some(row),
                UploadKind::Extra => staged.extras.push(row),
            }
        }
        Ok(staged)
    }

    /// Drop staged rows, all of them or only `only_ids`; returns how many
    pub async fn clear_staged(&self, batch: &BatchId, only_ids: Option<&[i64]>) -> ApiResult<usize> {
        let mut conn = self.db.acquire().await?;
        let removed = temp_uploads::delete_rows(&mut *conn, &batch.to_string(), only_ids).await?;
        drop(conn);
        for row in &removed {
            self.discard_blob(&row.file).await;
        }
        Ok(removed.len())
    }

    /// Purge batches staged more than `ttl` ago and never submitted
    pub async fn purge_abandoned(&self, ttl: chrono::Duration) -> ApiResult<usize> {
        let removed = temp_uploads::purge_older_than(self.db, now() - ttl).await?;
        for row in &removed {
            self.discard_blob(&row.file).await;
        }
        Ok(removed.len())
    }

    /// Remove blobs whose rows are already gone
    pub async fn discard_blobs(&self, rows: &[TempUpload]) {
        for row in rows {
            self.discard_blob(&row.file).await;
        }
    }

    async fn discard_blob(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            warn!(key, "Failed to delete staged file: {}", e);
        }
    }
}
