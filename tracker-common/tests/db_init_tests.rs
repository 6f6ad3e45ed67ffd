//! Database creation, seeding, migrations and integrity triggers

use sqlx::SqlitePool;
use tracker_common::db::{get_schema_version, init_database, CURRENT_SCHEMA_VERSION, SEED_CATEGORIES};
use tracker_common::time::now_rfc3339;

async fn fresh_db() -> (tempfile::TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("tracker.db")).await.unwrap();
    (dir, pool)
}

async fn insert_event(pool: &SqlitePool) -> i64 {
    let category_id: i64 = sqlx::query_scalar("SELECT id FROM categories ORDER BY id LIMIT 1")
        .fetch_one(pool)
        .await
        .unwrap();
    let theme_id = sqlx::query(
        "INSERT INTO themes (category_id, name, risk_rating, onset_timeline, created_at) VALUES (?, 'T', 'HIGH', 'IMMEDIATE', ?)",
    )
    .bind(category_id)
    .bind(now_rfc3339())
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid();
    sqlx::query(
        "INSERT INTO events (theme_id, name, description, date_identified, risk_rating, status, created_at) VALUES (?, 'E1', 'd', '2024-01-01', 'HIGH', 'OPEN', ?)",
    )
    .bind(theme_id)
    .bind(now_rfc3339())
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

async fn insert_legacy_source(pool: &SqlitePool, event_id: i64, name: &str, summary: &str) -> i64 {
    sqlx::query(
        "INSERT INTO sources (event_id, name, source_date, summary, link_or_file, source_type, created_at) VALUES (?, ?, '2024-01-10', ?, 'https://example.com', 'LINK', ?)",
    )
    .bind(event_id)
    .bind(name)
    .bind(summary)
    .bind(now_rfc3339())
    .execute(pool)
    .await
    .unwrap()
    .last_insert_rowid()
}

#[tokio::test]
async fn test_database_created_and_reopened() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("tracker.db");

    let pool1 = init_database(&db_path).await.unwrap();
    assert!(db_path.exists());
    drop(pool1);

    let pool2 = init_database(&db_path).await.unwrap();
    let version = get_schema_version(&pool2).await.unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[tokio::test]
async fn test_categories_seeded_once() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("tracker.db");
    drop(init_database(&db_path).await.unwrap());
    let pool = init_database(&db_path).await.unwrap();

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count as usize, SEED_CATEGORIES.len());
}

#[tokio::test]
async fn test_foreign_keys_enforced_on_every_connection() {
    let (_dir, pool) = fresh_db().await;
    for _ in 0..3 {
        let result = sqlx::query(
            "INSERT INTO events (theme_id, name, description, date_identified, risk_rating, status, created_at) VALUES (9999, 'x', 'd', '2024-01-01', 'LOW', 'OPEN', ?)",
        )
        .bind(now_rfc3339())
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}

#[tokio::test]
async fn test_theme_with_events_cannot_be_deleted() {
    let (_dir, pool) = fresh_db().await;
    let event_id = insert_event(&pool).await;
    let theme_id: i64 = sqlx::query_scalar("SELECT theme_id FROM events WHERE id = ?")
        .bind(event_id)
        .fetch_one(&pool)
        .await
        .unwrap();

    let result = sqlx::query("DELETE FROM themes WHERE id = ?")
        .bind(theme_id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_one_main_per_batch_index() {
    let (_dir, pool) = fresh_db().await;
    let insert = "INSERT INTO temp_uploads (batch_id, kind, file, original_name, created_at) VALUES ('b1', ?, 'k', 'n.pdf', ?)";

    sqlx::query(insert).bind("MAIN").bind(now_rfc3339()).execute(&pool).await.unwrap();
    sqlx::query(insert).bind("EXTRA").bind(now_rfc3339()).execute(&pool).await.unwrap();
    sqlx::query(insert).bind("EXTRA").bind(now_rfc3339()).execute(&pool).await.unwrap();
    let second_main = sqlx::query(insert).bind("MAIN").bind(now_rfc3339()).execute(&pool).await;
    assert!(second_main.is_err());
}

#[tokio::test]
async fn test_legacy_rows_backfilled_on_migration() {
    let (_dir, pool) = fresh_db().await;
    let event_id = insert_event(&pool).await;
    let a = insert_legacy_source(&pool, event_id, "Report", "Q1 review").await;
    let b = insert_legacy_source(&pool, event_id, " Report", "q1 REVIEW ").await;
    let c = insert_legacy_source(&pool, event_id, "Other", "Q1 review").await;

    sqlx::query("DELETE FROM schema_version").execute(&pool).await.unwrap();
    tracker_common::db::run_migrations(&pool).await.unwrap();

    let rows: Vec<(i64, Option<String>, String)> =
        sqlx::query_as("SELECT id, download_token, bundle_id FROM sources ORDER BY id")
            .fetch_all(&pool)
            .await
            .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(_, token, _)| token.as_deref().map_or(false, |t| uuid::Uuid::parse_str(t).is_ok())));

    let bundle_of = |id: i64| rows.iter().find(|r| r.0 == id).unwrap().2.clone();
    assert!(!bundle_of(a).is_empty());
    assert_eq!(bundle_of(a), bundle_of(b));
    assert_ne!(bundle_of(a), bundle_of(c));
}

#[tokio::test]
async fn test_file_names_backfilled_from_keys() {
    let (_dir, pool) = fresh_db().await;
    let event_id = insert_event(&pool).await;
    let insert_file = |key: &'static str, name: Option<&'static str>| {
        let pool = pool.clone();
        async move {
            sqlx::query(
                "INSERT INTO sources (event_id, name, source_date, summary, file_upload, file_name, source_type, created_at) VALUES (?, 'R', '2024-01-10', 'S', ?, ?, 'FILE', ?)",
            )
            .bind(event_id)
            .bind(key)
            .bind(name)
            .bind(now_rfc3339())
            .execute(&pool)
            .await
            .unwrap()
            .last_insert_rowid()
        }
    };
    let legacy = insert_file("sources/abc/Q1_report.pdf", None).await;
    let named = insert_file("sources/def/Q2_report.pdf", Some("Q2 report.pdf")).await;
    let link = insert_legacy_source(&pool, event_id, "Link", "L").await;

    sqlx::query("DELETE FROM schema_version").execute(&pool).await.unwrap();
    tracker_common::db::run_migrations(&pool).await.unwrap();

    let name_of = |id: i64| {
        let pool = pool.clone();
        async move {
            sqlx::query_scalar::<_, Option<String>>("SELECT file_name FROM sources WHERE id = ?")
                .bind(id)
                .fetch_one(&pool)
                .await
                .unwrap()
        }
    };
    assert_eq!(name_of(legacy).await.as_deref(), Some("Q1_report.pdf"));
    assert_eq!(name_of(named).await.as_deref(), Some("Q2 report.pdf"));
    assert_eq!(name_of(link).await, None);
}

#[tokio::test]
async fn test_download_token_is_immutable() {
    let (_dir, pool) = fresh_db().await;
    let event_id = insert_event(&pool).await;
    let id = insert_legacy_source(&pool, event_id, "Report", "s").await;

    sqlx::query("UPDATE sources SET download_token = ? WHERE id = ?")
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let second = sqlx::query("UPDATE sources SET download_token = ? WHERE id = ?")
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(id)
        .execute(&pool)
        .await;
    assert!(second.is_err());

    // Other columns stay editable
    sqlx::query("UPDATE sources SET is_active = 0 WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_download_logs_append_only() {
    let (_dir, pool) = fresh_db().await;
    let id = sqlx::query(
        "INSERT INTO download_logs (object_key, token, served_at) VALUES ('k', 't', ?)",
    )
    .bind(now_rfc3339())
    .execute(&pool)
    .await
    .unwrap()
    .last_insert_rowid();

    let result = sqlx::query("UPDATE download_logs SET object_key = 'x' WHERE id = ?")
        .bind(id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}
