//! Append-only audit records: downloads and logins

use sqlx::{Executor, Sqlite};
use tracker_common::db::{DownloadLog, UserAccessLog};
use tracker_common::time::now_rfc3339;
use tracker_common::Result;

/// One served download
#[derive(Debug, Clone)]
pub struct NewDownloadLog<'a> {
    pub user_id: Option<i64>,
    pub ip: Option<&'a str>,
    pub user_agent: &'a str,
    pub object_key: &'a str,
    pub token: &'a str,
}

pub async fn record_download<'e, E>(executor: E, entry: &NewDownloadLog<'_>) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO download_logs (user_id, ip, user_agent, object_key, token, served_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(entry.user_id)
    .bind(entry.ip)
    .bind(entry.user_agent)
    .bind(entry.object_key)
    .bind(entry.token)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn downloads_for_token<'e, E>(executor: E, token: &str) -> Result<Vec<DownloadLog>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT * FROM download_logs WHERE token = ? ORDER BY id")
        .bind(token)
        .fetch_all(executor)
        .await?;
    rows.iter().map(DownloadLog::from_row).collect()
}

pub async fn record_login<'e, E>(
    executor: E,
    user_id: i64,
    username: &str,
    ip: Option<&str>,
    user_agent: &str,
) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT INTO user_access_logs (user_id, username, ip, user_agent, login_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(user_id)
    .bind(username)
    .bind(ip)
    .bind(user_agent)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Most recent logins first
pub async fn recent_logins<'e, E>(executor: E, limit: i64) -> Result<Vec<UserAccessLog>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query("SELECT * FROM user_access_logs ORDER BY login_at DESC, id DESC LIMIT ?")
        .bind(limit)
        .fetch_all(executor)
        .await?;
    rows.iter().map(UserAccessLog::from_row).collect()
}
