//! Source Mutation Workflow
//!
//! Creates or updates a bundle leader together with sibling rows for extra
//! links and files. Each run:
//!
//! 1. drops staged items the user removed, stages the files of this request
//! 2. validates fields, links, summary uniqueness and attachments
//! 3. copies staged blobs to permanent keys
//! 4. writes every row in one transaction, deleting the batch's staged rows;
//!    summary uniqueness is checked again once the transaction holds the
//!    write lock
//! 5. after commit, deletes the staged blobs
//!
//! Any failure before commit leaves the staged rows in place and removes
//! the permanent copies made in step 3.

mod create;
mod update;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::warn;
use tracker_common::db::TempUpload;
use tracker_common::tokens::BatchId;

use crate::db::sources::StoredFile;
use crate::error::{ApiError, ApiResult, FormErrors, ValidationFailure};
use crate::forms::SourceFormInput;
use crate::staging::{IncomingFile, StagedFiles, StagingArea, UploadPolicy};
use crate::storage::{read_all, source_key, BlobStorage};
use crate::AppState;

/// One submitted source form
#[derive(Debug, Clone)]
pub struct SourceSubmission {
    pub batch: BatchId,
    pub form: SourceFormInput,
    /// File posted in the main slot with this request
    pub main_file: Option<IncomingFile>,
    pub extra_files: Vec<IncomingFile>,
    pub extra_links: Vec<String>,
    /// Staged rows the user removed before submitting
    pub drop_temp_ids: Vec<i64>,
    /// Siblings to archive (update only)
    pub remove_item_ids: Vec<i64>,
    /// Detach the current main file (update only)
    pub clear_main_file: bool,
}

impl SourceSubmission {
    pub fn new(batch: BatchId, form: SourceFormInput) -> Self {
        Self {
            batch,
            form,
            main_file: None,
            extra_files: Vec::new(),
            extra_links: Vec::new(),
            drop_temp_ids: Vec::new(),
            remove_item_ids: Vec::new(),
            clear_main_file: false,
        }
    }
}

/// What a successful run changed
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    pub leader_id: i64,
    pub bundle_id: String,
    /// Sibling rows created by this run
    pub created_ids: Vec<i64>,
    pub archived_ids: Vec<i64>,
    /// History row for a replaced main file
    pub version_id: Option<i64>,
    pub message: String,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
struct StagedItem {
    id: i64,
    original_name: String,
    size_bytes: i64,
}

impl From<&TempUpload> for StagedItem {
    fn from(row: &TempUpload) -> Self {
        Self {
            id: row.id,
            original_name: row.original_name.clone(),
            size_bytes: row.size_bytes,
        }
    }
}

/// Everything a client needs to show the form again after a rejection
#[derive(Debug, Clone, Serialize)]
struct FormState<'a> {
    batch_id: String,
    fields: &'a SourceFormInput,
    extra_links: &'a [String],
    remove_item_ids: &'a [i64],
    staged_main: Option<StagedItem>,
    staged_extras: Vec<StagedItem>,
}

/// Staged files of the batch after this request's uploads
struct Prepared {
    staged: StagedFiles,
    warnings: Vec<String>,
    extra_links: Vec<String>,
}

/// Staged files copied to permanent keys, with their upload names
#[derive(Debug, Default)]
struct PromotedFiles {
    main: Option<StoredFile>,
    extras: Vec<StoredFile>,
}

/// Outcome of a write transaction
enum Written<T> {
    Committed(T),
    /// Rolled back with nothing written
    Rejected(FormErrors),
}

impl PromotedFiles {
    fn keys(&self) -> Vec<String> {
        self.main.iter().chain(self.extras.iter()).map(|f| f.key.clone()).collect()
    }
}

pub struct SourceWorkflow<'a> {
    db: &'a SqlitePool,
    storage: &'a dyn BlobStorage,
    policy: &'a UploadPolicy,
}

impl<'a> SourceWorkflow<'a> {
    pub fn new(db: &'a SqlitePool, storage: &'a dyn BlobStorage, policy: &'a UploadPolicy) -> Self {
        Self { db, storage, policy }
    }

    pub fn from_state(state: &'a AppState) -> Self {
        Self::new(&state.db, state.storage.as_ref(), state.uploads.as_ref())
    }

    fn staging(&self) -> StagingArea<'_> {
        StagingArea::new(self.db, self.storage, self.policy)
    }

    /// Steps shared by create and update before validation
    async fn prepare(&self, sub: &SourceSubmission, user_id: i64) -> ApiResult<Prepared> {
        let staging = self.staging();

        if !sub.drop_temp_ids.is_empty() {
            staging.clear_staged(&sub.batch, Some(&sub.drop_temp_ids)).await?;
        }

        let report = staging
            .stage(&sub.batch, Some(user_id), sub.main_file.clone(), sub.extra_files.clone())
            .await?;

        let mut warnings: Vec<String> = report.rejected.iter().map(|r| r.to_string()).collect();
        if !report.rejected.is_empty() {
            warnings.push(format!(
                "{} file(s) were skipped (only {} allowed).",
                report.rejected.len(),
                self.policy.allowed_list()
            ));
        }

        Ok(Prepared {
            staged: staging.get_staged(&sub.batch).await?,
            warnings,
            extra_links: crate::forms::clean_extra_links(&sub.extra_links),
        })
    }

    /// Rejection carrying the full in-progress form state
    fn reject(&self, errors: FormErrors, sub: &SourceSubmission, prepared: &Prepared) -> ApiError {
        let state = FormState {
            batch_id: sub.batch.to_string(),
            fields: &sub.form,
            extra_links: &prepared.extra_links,
            remove_item_ids: &sub.remove_item_ids,
            staged_main: prepared.staged.main.as_ref().map(StagedItem::from),
            staged_extras: prepared.staged.extras.iter().map(StagedItem::from).collect(),
        };
        ApiError::Validation(Box::new(ValidationFailure {
            errors,
            warnings: prepared.warnings.clone(),
            state: serde_json::to_value(&state).unwrap_or(serde_json::Value::Null),
        }))
    }

    /// Copy staged blobs to permanent source keys
    async fn promote(&self, staged: &StagedFiles) -> ApiResult<PromotedFiles> {
        let mut promoted = PromotedFiles::default();
        let result = async {
            if let Some(main) = &staged.main {
                promoted.main = Some(self.promote_one(main).await?);
            }
            for extra in &staged.extras {
                promoted.extras.push(self.promote_one(extra).await?);
            }
            Ok::<(), ApiError>(())
        }
        .await;

        match result {
            Ok(()) => Ok(promoted),
            Err(e) => {
                self.discard(&promoted.keys()).await;
                Err(e)
            }
        }
    }

    async fn promote_one(&self, row: &TempUpload) -> ApiResult<StoredFile> {
        let bytes = read_all(self.storage, &row.file).await?;
        let key = self.storage.save(&source_key(&row.original_name), bytes).await?;
        Ok(StoredFile {
            key,
            name: row.original_name.clone(),
        })
    }

    /// Best-effort removal of blobs that no row references
    async fn discard(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.storage.delete(key).await {
                warn!(key = %key, "Failed to delete orphaned file: {}", e);
            }
        }
    }
}

/// "Source created: main file attached, 2 additional link(s) added."
fn summarize(verb: &str, parts: &[String]) -> String {
    if parts.is_empty() {
        format!("Source {}. No changes detected.", verb)
    } else {
        format!("Source {}: {}.", verb, parts.join(", "))
    }
}

fn count_part(count: usize, what: &str) -> Option<String> {
    (count > 0).then(|| format!("{} {}", count, what))
}
