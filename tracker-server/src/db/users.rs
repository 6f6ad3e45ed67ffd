//! User accounts and password verification
//!
//! Passwords are stored as Argon2id PHC strings; the salt and parameters
//! travel inside the string.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;
use sqlx::{Executor, Sqlite, SqlitePool};
use tracing::{info, warn};
use tracker_common::config::BootstrapConfig;
use tracker_common::db::User;
use tracker_common::time::now_rfc3339;
use tracker_common::{Error, Result};

/// Attributes of an account being created
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

/// PHC string for `password` under a fresh random salt
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| Error::Internal(format!("Password salt encoding failed: {}", e)))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::Internal(format!("Password hashing failed: {}", e)))?;
    Ok(hash.to_string())
}

/// Constant-time check of `password` against the stored PHC string
pub fn verify_password(user: &User, password: &str) -> bool {
    match PasswordHash::new(&user.password_hash) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(e) => {
            warn!(user_id = user.id, "Unreadable password hash: {}", e);
            false
        }
    }
}

pub async fn create_user<'e, E>(executor: E, new: &NewUser) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let username = new.username.trim();
    if username.is_empty() {
        return Err(Error::InvalidInput("Username is required".to_string()));
    }
    let password_hash = hash_password(&new.password)?;
    let result = sqlx::query(
        r#"
        INSERT INTO users (username, email, password_hash, is_staff, is_superuser, is_active, created_at)
        VALUES (?, ?, ?, ?, ?, 1, ?)
        "#,
    )
    .bind(username)
    .bind(new.email.trim())
    .bind(&password_hash)
    .bind(new.is_staff)
    .bind(new.is_superuser)
    .bind(now_rfc3339())
    .execute(executor)
    .await
    .map_err(|e| {
        if matches!(&e, sqlx::Error::Database(db) if db.is_unique_violation()) {
            Error::Conflict(format!("Username '{}' is taken", username))
        } else {
            Error::Database(e)
        }
    })?;

    Ok(result.last_insert_rowid())
}

pub async fn get<'e, E>(executor: E, id: i64) -> Result<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(User::from_row).transpose()
}

pub async fn find_by_username<'e, E>(executor: E, username: &str) -> Result<Option<User>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM users WHERE username = ? COLLATE NOCASE")
        .bind(username.trim())
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(User::from_row).transpose()
}

/// Resolve a login identifier: an email owned by exactly one account,
/// otherwise a username (both case-insensitive)
pub async fn find_for_login(pool: &SqlitePool, identifier: &str) -> Result<Option<User>> {
    let identifier = identifier.trim();
    if identifier.contains('@') {
        let rows = sqlx::query("SELECT * FROM users WHERE email = ? COLLATE NOCASE LIMIT 2")
            .bind(identifier)
            .fetch_all(pool)
            .await?;
        if rows.len() == 1 {
            return Ok(Some(User::from_row(&rows[0])?));
        }
    }
    find_by_username(pool, identifier).await
}

/// Active user matching identifier and password
pub async fn authenticate(pool: &SqlitePool, identifier: &str, password: &str) -> Result<Option<User>> {
    let user = find_for_login(pool, identifier).await?;
    Ok(user.filter(|u| u.is_active && verify_password(u, password)))
}

/// Create or refresh the configured superuser
///
/// Does nothing when no password is configured.
pub async fn ensure_superuser(pool: &SqlitePool, bootstrap: &BootstrapConfig) -> Result<Option<i64>> {
    let Some(password) = bootstrap.superuser_password.as_deref() else {
        return Ok(None);
    };

    match find_by_username(pool, &bootstrap.superuser_username).await? {
        Some(existing) => {
            sqlx::query(
                r#"
                UPDATE users
                SET email = ?, password_hash = ?,
                    is_staff = 1, is_superuser = 1, is_active = 1
                WHERE id = ?
                "#,
            )
            .bind(&bootstrap.superuser_email)
            .bind(hash_password(password)?)
            .bind(existing.id)
            .execute(pool)
            .await?;
            info!(username = %existing.username, "Refreshed bootstrap superuser");
            Ok(Some(existing.id))
        }
        None => {
            let id = create_user(
                pool,
                &NewUser {
                    username: bootstrap.superuser_username.clone(),
                    email: bootstrap.superuser_email.clone(),
                    password: password.to_string(),
                    is_staff: true,
                    is_superuser: true,
                },
            )
            .await?;
            info!(username = %bootstrap.superuser_username, "Created bootstrap superuser");
            Ok(Some(id))
        }
    }
}
