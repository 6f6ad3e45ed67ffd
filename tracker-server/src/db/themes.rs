//! Themes and their categories

use sqlx::{Executor, Sqlite, SqlitePool};
use tracker_common::db::{Category, OnsetTimeline, RiskRating, Theme};
use tracker_common::time::now_rfc3339;
use tracker_common::{Error, Result};

const THEME_SELECT: &str = r#"
    SELECT t.*, c.name AS category_name
    FROM themes t
    JOIN categories c ON c.id = t.category_id
"#;

#[derive(Debug, Clone, Default)]
pub struct ThemeQuery {
    pub include_archived: bool,
    /// Substring of the theme or category name
    pub q: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewTheme {
    pub category_id: i64,
    pub name: String,
    pub description: String,
    pub risk_rating: RiskRating,
    pub onset_timeline: OnsetTimeline,
}

pub async fn list_categories(pool: &SqlitePool) -> Result<Vec<Category>> {
    let rows = sqlx::query("SELECT * FROM categories ORDER BY name")
        .fetch_all(pool)
        .await?;
    rows.iter().map(Category::from_row).collect()
}

pub async fn insert<'e, E>(executor: E, theme: &NewTheme, created_by: Option<i64>) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO themes (category_id, name, description, risk_rating, onset_timeline, is_active, created_by, created_at)
        VALUES (?, ?, ?, ?, ?, 1, ?, ?)
        "#,
    )
    .bind(theme.category_id)
    .bind(theme.name.trim())
    .bind(&theme.description)
    .bind(theme.risk_rating.as_str())
    .bind(theme.onset_timeline.as_str())
    .bind(created_by)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn get<'e, E>(executor: E, id: i64) -> Result<Option<Theme>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query(&format!("{} WHERE t.id = ?", THEME_SELECT))
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Theme::from_row).transpose()
}

/// Active themes by default, alphabetical
pub async fn list(pool: &SqlitePool, query: &ThemeQuery) -> Result<Vec<Theme>> {
    let pattern = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", q));

    let sql = format!(
        "{} WHERE (? OR t.is_active = 1) AND (? IS NULL OR t.name LIKE ? OR c.name LIKE ?) ORDER BY t.name COLLATE NOCASE, t.id",
        THEME_SELECT
    );
    let rows = sqlx::query(&sql)
        .bind(query.include_archived)
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .fetch_all(pool)
        .await?;
    rows.iter().map(Theme::from_row).collect()
}

/// Flip `is_active`; returns the new value
pub async fn toggle_active(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE themes SET is_active = NOT is_active WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Theme {}", id)));
    }
    let active: bool = sqlx::query_scalar("SELECT is_active FROM themes WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(active)
}

/// Hard delete; refused while the theme owns any event
pub async fn delete(pool: &SqlitePool, id: i64) -> Result<()> {
    let event_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE theme_id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if event_count > 0 {
        return Err(Error::Conflict(format!(
            "Theme {} still owns {} event(s); archive it instead",
            id, event_count
        )));
    }
    let result = sqlx::query("DELETE FROM themes WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Theme {}", id)));
    }
    Ok(())
}
