//! History of replaced main files

use sqlx::{Executor, Sqlite, SqliteConnection};
use tracker_common::db::SourceFileVersion;
use tracker_common::time::now_rfc3339;
use tracker_common::tokens::new_download_token;
use tracker_common::Result;
use uuid::Uuid;

/// Snapshot a file that is about to be replaced
pub async fn insert(
    conn: &mut SqliteConnection,
    source_id: i64,
    file: &str,
    original_name: &str,
    created_by: Option<i64>,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO source_file_versions (source_id, file, original_name, download_token, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(source_id)
    .bind(file)
    .bind(original_name)
    .bind(new_download_token().to_string())
    .bind(created_by)
    .bind(now_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Newest first
pub async fn list_for_source<'e, E>(executor: E, source_id: i64) -> Result<Vec<SourceFileVersion>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT * FROM source_file_versions WHERE source_id = ? ORDER BY id DESC")
        .bind(source_id)
        .fetch_all(executor)
        .await?;
    rows.iter().map(SourceFileVersion::from_row).collect()
}

pub async fn get_by_token<'e, E>(executor: E, token: &Uuid) -> Result<Option<SourceFileVersion>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM source_file_versions WHERE download_token = ?")
        .bind(token.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(SourceFileVersion::from_row).transpose()
}
