//! Login sessions

use chrono::Duration;
use sqlx::SqlitePool;
use tracker_common::db::User;
use tracker_common::time::{format_timestamp, now};
use tracker_common::tokens::new_session_token;
use tracker_common::Result;

/// Start a session; returns its token
pub async fn create(pool: &SqlitePool, user_id: i64, ttl: Duration) -> Result<String> {
    let token = new_session_token();
    let created = now();
    sqlx::query("INSERT INTO user_sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)")
        .bind(&token)
        .bind(user_id)
        .bind(format_timestamp(created))
        .bind(format_timestamp(created + ttl))
        .execute(pool)
        .await?;
    Ok(token)
}

/// Active user owning an unexpired session
pub async fn find_user(pool: &SqlitePool, token: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        r#"
        SELECT u.* FROM user_sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token = ? AND s.expires_at > ? AND u.is_active = 1
        "#,
    )
    .bind(token)
    .bind(format_timestamp(now()))
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(User::from_row).transpose()
}

pub async fn delete(pool: &SqlitePool, token: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM user_sessions WHERE token = ?")
        .bind(token)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn purge_expired(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM user_sessions WHERE expires_at <= ?")
        .bind(format_timestamp(now()))
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
