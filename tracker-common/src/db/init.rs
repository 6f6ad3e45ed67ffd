//! Database initialization
//!
//! Opens (creating when missing) the SQLite database, creates every table
//! idempotently, seeds reference categories and runs versioned migrations.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// How long a writer waits for the database lock before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Categories every deployment starts with
pub const SEED_CATEGORIES: &[&str] = &[
    "Operational",
    "Regulatory",
    "Cyber",
    "Financial",
    "Strategic",
    "Reputational",
];

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema_version_table(&pool).await?;
    create_users_table(&pool).await?;
    create_user_sessions_table(&pool).await?;
    create_user_access_logs_table(&pool).await?;
    create_categories_table(&pool).await?;
    create_themes_table(&pool).await?;
    create_events_table(&pool).await?;
    create_sources_table(&pool).await?;
    create_source_file_versions_table(&pool).await?;
    create_temp_uploads_table(&pool).await?;
    create_download_logs_table(&pool).await?;

    crate::db::migrations::run_migrations(&pool).await?;

    seed_categories(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_users_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE COLLATE NOCASE,
            email TEXT NOT NULL DEFAULT '',
            password_hash TEXT NOT NULL,
            is_staff INTEGER NOT NULL DEFAULT 0,
            is_superuser INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_users_email ON users(email COLLATE NOCASE)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_user_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_sessions (
            token TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_access_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_access_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            username TEXT NOT NULL,
            ip TEXT,
            user_agent TEXT NOT NULL DEFAULT '',
            login_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_categories_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_themes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS themes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            category_id INTEGER NOT NULL REFERENCES categories(id),
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            risk_rating TEXT NOT NULL CHECK (risk_rating IN ('LOW', 'MEDIUM', 'HIGH', 'CRITICAL')),
            onset_timeline TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    // RESTRICT: a theme cannot be hard-deleted while it owns events
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            theme_id INTEGER NOT NULL REFERENCES themes(id) ON DELETE RESTRICT,
            name TEXT NOT NULL CHECK (length(name) <= 30),
            description TEXT NOT NULL,
            date_identified TEXT NOT NULL,
            risk_rating TEXT NOT NULL CHECK (risk_rating IN ('LOW', 'MEDIUM', 'HIGH', 'CRITICAL')),
            status TEXT NOT NULL,
            control_in_place INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            risk_taxonomy_lv1 TEXT NOT NULL DEFAULT '[]',
            risk_taxonomy_lv2 TEXT NOT NULL DEFAULT '[]',
            risk_taxonomy_lv3 TEXT NOT NULL DEFAULT '[]',
            impacted_lines TEXT NOT NULL DEFAULT '[]',
            created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_theme ON events(theme_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_sources_table(pool: &SqlitePool) -> Result<()> {
    // download_token and bundle_id may be missing on rows written before
    // they existed; migrations backfill both
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id INTEGER NOT NULL REFERENCES events(id) ON DELETE CASCADE,
            bundle_id TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL,
            source_date TEXT NOT NULL,
            summary TEXT NOT NULL,
            potential_impact TEXT,
            potential_impact_notes TEXT NOT NULL DEFAULT '',
            link_or_file TEXT NOT NULL DEFAULT '',
            file_upload TEXT,
            file_name TEXT,
            source_type TEXT NOT NULL CHECK (source_type IN ('FILE', 'LINK')),
            is_active INTEGER NOT NULL DEFAULT 1,
            download_token TEXT UNIQUE,
            created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_bundle ON sources(bundle_id)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_event_active ON sources(event_id, is_active)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_source_file_versions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_file_versions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_id INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
            file TEXT NOT NULL,
            original_name TEXT NOT NULL DEFAULT '',
            download_token TEXT UNIQUE,
            created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_file_versions_source ON source_file_versions(source_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_temp_uploads_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS temp_uploads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('MAIN', 'EXTRA')),
            file TEXT NOT NULL,
            original_name TEXT NOT NULL,
            size_bytes INTEGER NOT NULL DEFAULT 0,
            user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_temp_uploads_batch ON temp_uploads(batch_id)")
        .execute(pool)
        .await?;

    // At most one MAIN per batch
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_temp_uploads_one_main ON temp_uploads(batch_id) WHERE kind = 'MAIN'",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_download_logs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER REFERENCES users(id) ON DELETE SET NULL,
            ip TEXT,
            user_agent TEXT NOT NULL DEFAULT '',
            object_key TEXT NOT NULL,
            token TEXT NOT NULL,
            served_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_download_logs_token ON download_logs(token)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn seed_categories(pool: &SqlitePool) -> Result<()> {
    for name in SEED_CATEGORIES {
        sqlx::query("INSERT OR IGNORE INTO categories (name) VALUES (?)")
            .bind(name)
            .execute(pool)
            .await?;
    }
    Ok(())
}
