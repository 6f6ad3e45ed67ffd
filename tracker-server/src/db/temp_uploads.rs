//! Staged upload rows
//!
//! Queries are keyed by batch id. The only cross-batch query is the
//! age-based purge of abandoned rows.

use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection};
use tracker_common::db::{TempUpload, UploadKind};
use tracker_common::time::{format_timestamp, now_rfc3339};
use tracker_common::Result;

#[derive(Debug, Clone)]
pub struct NewTempUpload<'a> {
    pub batch_id: &'a str,
    pub kind: UploadKind,
    pub file: &'a str,
    pub original_name: &'a str,
    pub size_bytes: i64,
    pub user_id: Option<i64>,
}

pub async fn insert<'e, E>(executor: E, upload: &NewTempUpload<'_>) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO temp_uploads (batch_id, kind, file, original_name, size_bytes, user_id, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(upload.batch_id)
    .bind(upload.kind.as_str())
    .bind(upload.file)
    .bind(upload.original_name)
    .bind(upload.size_bytes)
    .bind(upload.user_id)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Rows of a batch in staging order
pub async fn list_batch<'e, E>(executor: E, batch_id: &str) -> Result<Vec<TempUpload>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT * FROM temp_uploads WHERE batch_id = ? ORDER BY id")
        .bind(batch_id)
        .fetch_all(executor)
        .await?;
    rows.iter().map(TempUpload::from_row).collect()
}

/// Remove the MAIN row of a batch; returns the removed row
pub async fn delete_main(conn: &mut SqliteConnection, batch_id: &str) -> Result<Option<TempUpload>> {
    let row = sqlx::query("DELETE FROM temp_uploads WHERE batch_id = ? AND kind = 'MAIN' RETURNING *")
        .bind(batch_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(TempUpload::from_row).transpose()
}

/// Remove rows of a batch, all of them or only `ids`; returns removed rows
pub async fn delete_rows(
    conn: &mut SqliteConnection,
    batch_id: &str,
    only_ids: Option<&[i64]>,
) -> Result<Vec<TempUpload>> {
    let rows = match only_ids {
        None => {
            sqlx::query("DELETE FROM temp_uploads WHERE batch_id = ? RETURNING *")
                .bind(batch_id)
                .fetch_all(&mut *conn)
                .await?
        }
        Some(ids) => {
            let mut removed = Vec::new();
            for &id in ids {
                let row = sqlx::query("DELETE FROM temp_uploads WHERE batch_id = ? AND id = ? RETURNING *")
                    .bind(batch_id)
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;
                removed.extend(row);
            }
            removed
        }
    };
    rows.iter().map(TempUpload::from_row).collect()
}

/// Remove rows staged before `cutoff`, whatever their batch; returns removed rows
pub async fn purge_older_than<'e, E>(executor: E, cutoff: DateTime<Utc>) -> Result<Vec<TempUpload>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("DELETE FROM temp_uploads WHERE created_at < ? RETURNING *")
        .bind(format_timestamp(cutoff))
        .fetch_all(executor)
        .await?;
    rows.iter().map(TempUpload::from_row).collect()
}
