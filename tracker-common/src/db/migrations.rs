//! Database schema migrations
//!
//! Versioned, tracked in `schema_version`, each safe to run more than once.
//!
//! - v1: backfill `download_token` on sources and file versions
//! - v2: backfill `bundle_id` from the derived bundle key
//! - v3: integrity triggers (immutable tokens, append-only history and logs)
//! - v4: `sources.file_name`, backfilled from the storage key

use crate::tokens::{new_bundle_id, new_download_token};
use crate::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use tracing::{info, warn};

/// Current schema version
///
/// Increment this when adding new migrations
pub const CURRENT_SCHEMA_VERSION: i32 = 4;

/// Latest applied version, 0 when none
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT OR REPLACE INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    if current_version < 2 {
        migrate_v2(pool).await?;
        set_schema_version(pool, 2).await?;
        info!("Migration v2 completed");
    }

    if current_version < 3 {
        migrate_v3(pool).await?;
        set_schema_version(pool, 3).await?;
        info!("Migration v3 completed");
    }

    if current_version < 4 {
        migrate_v4(pool).await?;
        set_schema_version(pool, 4).await?;
        info!("Migration v4 completed");
    }

    Ok(())
}

/// Migration v1: every source and file version gets a download token
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    for table in ["sources", "source_file_versions"] {
        let ids: Vec<i64> = sqlx::query_scalar(&format!(
            "SELECT id FROM {} WHERE download_token IS NULL OR download_token = ''",
            table
        ))
        .fetch_all(pool)
        .await?;

        for id in &ids {
            sqlx::query(&format!("UPDATE {} SET download_token = ? WHERE id = ?", table))
                .bind(new_download_token().to_string())
                .bind(id)
                .execute(pool)
                .await?;
        }

        if !ids.is_empty() {
            info!("Migration v1: assigned download tokens to {} {} rows", ids.len(), table);
        }
    }
    Ok(())
}

/// Derived bundle key: (event, trimmed name, date, lower-cased trimmed summary)
fn derived_bundle_key(event_id: i64, name: &str, source_date: &str, summary: &str) -> (i64, String, String, String) {
    (
        event_id,
        name.trim().to_string(),
        source_date.trim().to_string(),
        summary.trim().to_lowercase(),
    )
}

/// Migration v2: rows without a bundle id join the bundle of their derived key
///
/// A derived group that already has an id (from any member) keeps it.
async fn migrate_v2(pool: &SqlitePool) -> Result<()> {
    let rows = sqlx::query(
        "SELECT id, event_id, name, source_date, summary, bundle_id FROM sources ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    let mut known: HashMap<(i64, String, String, String), String> = HashMap::new();
    let mut pending: Vec<(i64, (i64, String, String, String))> = Vec::new();

    for row in &rows {
        let id: i64 = row.try_get("id")?;
        let key = derived_bundle_key(
            row.try_get("event_id")?,
            &row.try_get::<String, _>("name")?,
            &row.try_get::<String, _>("source_date")?,
            &row.try_get::<String, _>("summary")?,
        );
        let bundle_id: String = row.try_get("bundle_id")?;
        if bundle_id.is_empty() {
            pending.push((id, key));
        } else {
            known.entry(key).or_insert(bundle_id);
        }
    }

    for (id, key) in &pending {
        let bundle_id = known.entry(key.clone()).or_insert_with(new_bundle_id).clone();
        sqlx::query("UPDATE sources SET bundle_id = ? WHERE id = ?")
            .bind(&bundle_id)
            .bind(id)
            .execute(pool)
            .await?;
    }

    if !pending.is_empty() {
        info!("Migration v2: assigned bundle ids to {} source rows", pending.len());
    }
    Ok(())
}

/// Migration v3: integrity triggers
async fn migrate_v3(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_sources_token_immutable
        BEFORE UPDATE OF download_token ON sources
        WHEN OLD.download_token IS NOT NULL AND NEW.download_token IS NOT OLD.download_token
        BEGIN
            SELECT RAISE(ABORT, 'download_token is immutable');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_file_versions_no_update
        BEFORE UPDATE ON source_file_versions
        WHEN OLD.download_token IS NOT NULL
        BEGIN
            SELECT RAISE(ABORT, 'source_file_versions rows are immutable');
        END
        "#,
        r#"
        CREATE TRIGGER IF NOT EXISTS trg_download_logs_no_update
        BEFORE UPDATE ON download_logs
        BEGIN
            SELECT RAISE(ABORT, 'download_logs rows are append-only');
        END
        "#,
    ];

    for sql in statements {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}

/// Migration v4: original upload name for attached files
///
/// Rows written before the column existed get the last segment of their
/// storage key, the best name still known for them.
async fn migrate_v4(pool: &SqlitePool) -> Result<()> {
    let has_column: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM pragma_table_info('sources') WHERE name = 'file_name'",
    )
    .fetch_one(pool)
    .await?;
    if !has_column {
        sqlx::query("ALTER TABLE sources ADD COLUMN file_name TEXT")
            .execute(pool)
            .await?;
    }

    let rows = sqlx::query(
        "SELECT id, file_upload FROM sources WHERE file_name IS NULL AND file_upload IS NOT NULL AND file_upload != ''",
    )
    .fetch_all(pool)
    .await?;
    for row in &rows {
        let id: i64 = row.try_get("id")?;
        let key: String = row.try_get("file_upload")?;
        let name = key.rsplit('/').next().unwrap_or(&key);
        sqlx::query("UPDATE sources SET file_name = ? WHERE id = ?")
            .bind(name)
            .bind(id)
            .execute(pool)
            .await?;
    }

    if !rows.is_empty() {
        info!("Migration v4: recorded file names for {} source rows", rows.len());
    }
    Ok(())
}
