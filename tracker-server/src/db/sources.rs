//! Source rows: bundle leaders and siblings
//!
//! Every row of a bundle carries the same `bundle_id` and the same
//! descriptive fields. `download_token` is written once at insert time.

use chrono::NaiveDate;
use sqlx::{Executor, Row, Sqlite, SqliteConnection};
use tracker_common::db::{PotentialImpact, Source, SourceType};
use tracker_common::time::{format_date, now_rfc3339};
use tracker_common::tokens::new_download_token;
use tracker_common::Result;
use uuid::Uuid;

use crate::bundles::normalize_summary;

/// Descriptive fields shared by every member of a bundle
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFields {
    pub name: String,
    pub source_date: NaiveDate,
    pub summary: String,
    pub potential_impact: Option<PotentialImpact>,
    pub potential_impact_notes: String,
}

/// A file in permanent storage and the name it was uploaded under
#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub key: String,
    pub name: String,
}

/// Attachment carried by a single row
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attachment {
    pub link: String,
    pub file: Option<StoredFile>,
}

impl Attachment {
    pub fn link(url: impl Into<String>) -> Self {
        Self {
            link: url.into(),
            file: None,
        }
    }

    pub fn file(file: StoredFile) -> Self {
        Self {
            link: String::new(),
            file: Some(file),
        }
    }

    fn key(&self) -> Option<&str> {
        self.file.as_ref().map(|f| f.key.as_str())
    }

    fn file_name(&self) -> Option<&str> {
        self.file.as_ref().map(|f| f.name.as_str())
    }
}

/// Insert one row; returns `(id, download_token)`
pub async fn insert(
    conn: &mut SqliteConnection,
    event_id: i64,
    bundle_id: &str,
    fields: &SourceFields,
    attachment: &Attachment,
    created_by: Option<i64>,
) -> Result<(i64, Uuid)> {
    let token = new_download_token();
    let source_type = SourceType::derive(attachment.file.is_some());
    let result = sqlx::query(
        r#"
        INSERT INTO sources (
            event_id, bundle_id, name, source_date, summary, potential_impact,
            potential_impact_notes, link_or_file, file_upload, file_name, source_type,
            is_active, download_token, created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
        "#,
    )
    .bind(event_id)
    .bind(bundle_id)
    .bind(&fields.name)
    .bind(format_date(fields.source_date))
    .bind(&fields.summary)
    .bind(fields.potential_impact.map(|p| p.as_str()))
    .bind(&fields.potential_impact_notes)
    .bind(&attachment.link)
    .bind(attachment.key())
    .bind(attachment.file_name())
    .bind(source_type.as_str())
    .bind(token.to_string())
    .bind(created_by)
    .bind(now_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok((result.last_insert_rowid(), token))
}

pub async fn get<'e, E>(executor: E, id: i64) -> Result<Option<Source>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM sources WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Source::from_row).transpose()
}

pub async fn get_by_token<'e, E>(executor: E, token: &Uuid) -> Result<Option<Source>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM sources WHERE download_token = ?")
        .bind(token.to_string())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Source::from_row).transpose()
}

/// Rows of an event in id order; archived rows only when asked for
pub async fn list_for_event<'e, E>(executor: E, event_id: i64, include_archived: bool) -> Result<Vec<Source>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT * FROM sources WHERE event_id = ? AND (? OR is_active = 1) ORDER BY id")
        .bind(event_id)
        .bind(include_archived)
        .fetch_all(executor)
        .await?;
    rows.iter().map(Source::from_row).collect()
}

/// Every member of a bundle, active first, then id
pub async fn list_bundle<'e, E>(executor: E, bundle_id: &str) -> Result<Vec<Source>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT * FROM sources WHERE bundle_id = ? ORDER BY is_active DESC, id")
        .bind(bundle_id)
        .fetch_all(executor)
        .await?;
    rows.iter().map(Source::from_row).collect()
}

/// Whether another bundle of the event already uses this summary
///
/// Compared trimmed and case-insensitively, archived rows included.
pub async fn summary_taken<'e, E>(
    executor: E,
    event_id: i64,
    summary: &str,
    exclude_bundle: Option<&str>,
) -> Result<bool>
where
    E: Executor<'e, Database = Sqlite>,
{
    let wanted = normalize_summary(summary);
    let rows = sqlx::query("SELECT bundle_id, summary FROM sources WHERE event_id = ?")
        .bind(event_id)
        .fetch_all(executor)
        .await?;
    for row in &rows {
        let bundle_id: String = row.try_get("bundle_id")?;
        if exclude_bundle == Some(bundle_id.as_str()) {
            continue;
        }
        let existing: String = row.try_get("summary")?;
        if normalize_summary(&existing) == wanted {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Distinct summaries already used by an event, in first-use order
pub async fn existing_summaries<'e, E>(executor: E, event_id: i64) -> Result<Vec<String>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let summaries: Vec<String> = sqlx::query_scalar(
        "SELECT summary FROM sources WHERE event_id = ? GROUP BY bundle_id ORDER BY MIN(id)",
    )
    .bind(event_id)
    .fetch_all(executor)
    .await?;
    Ok(summaries)
}

/// Take the write lock on a row for the rest of the transaction
///
/// SQLite has no row locks; the first write of a transaction takes the
/// database write lock, and other writers wait on the busy timeout.
/// Returns false when the row does not exist.
pub async fn lock_for_update(conn: &mut SqliteConnection, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE sources SET is_active = is_active WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Copy descriptive fields onto every member of a bundle
pub async fn update_bundle_fields(conn: &mut SqliteConnection, bundle_id: &str, fields: &SourceFields) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE sources SET
            name = ?, source_date = ?, summary = ?,
            potential_impact = ?, potential_impact_notes = ?
        WHERE bundle_id = ?
        "#,
    )
    .bind(&fields.name)
    .bind(format_date(fields.source_date))
    .bind(&fields.summary)
    .bind(fields.potential_impact.map(|p| p.as_str()))
    .bind(&fields.potential_impact_notes)
    .bind(bundle_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Replace the attachment of one row; source_type follows the file
pub async fn set_attachment(conn: &mut SqliteConnection, id: i64, attachment: &Attachment) -> Result<()> {
    sqlx::query(
        "UPDATE sources SET link_or_file = ?, file_upload = ?, file_name = ?, source_type = ? WHERE id = ?",
    )
    .bind(&attachment.link)
    .bind(attachment.key())
    .bind(attachment.file_name())
    .bind(SourceType::derive(attachment.file.is_some()).as_str())
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Archive the given rows, restricted to active siblings of `leader_id`
/// inside `bundle_id`; returns the ids actually archived
pub async fn archive_siblings(
    conn: &mut SqliteConnection,
    bundle_id: &str,
    leader_id: i64,
    ids: &[i64],
) -> Result<Vec<i64>> {
    let mut archived = Vec::new();
    for &id in ids {
        let result = sqlx::query(
            "UPDATE sources SET is_active = 0 WHERE id = ? AND bundle_id = ? AND id != ? AND is_active = 1",
        )
        .bind(id)
        .bind(bundle_id)
        .bind(leader_id)
        .execute(&mut *conn)
        .await?;
        if result.rows_affected() > 0 {
            archived.push(id);
        }
    }
    Ok(archived)
}

/// Active members of a bundle carrying a link or a file
pub async fn count_active_attachments<'e, E>(executor: E, bundle_id: &str) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM sources
        WHERE bundle_id = ? AND is_active = 1
          AND (trim(link_or_file) != '' OR (file_upload IS NOT NULL AND file_upload != ''))
        "#,
    )
    .bind(bundle_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// Flip `is_active` on a single row; returns the new value, None if missing
pub async fn toggle_active<'e, E>(executor: E, id: i64) -> Result<Option<bool>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let active: Option<bool> =
        sqlx::query_scalar("UPDATE sources SET is_active = NOT is_active WHERE id = ? RETURNING is_active")
            .bind(id)
            .fetch_optional(executor)
            .await?;
    Ok(active)
}
