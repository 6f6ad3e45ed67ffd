//! Events

use chrono::NaiveDate;
use sqlx::{Executor, Sqlite, SqlitePool};
use std::str::FromStr;
use tracker_common::db::{encode_list, Event, EventStatus, RiskRating};
use tracker_common::time::{format_date, now_rfc3339};
use tracker_common::{Error, Result};

/// Validated event attributes
#[derive(Debug, Clone)]
pub struct EventInput {
    pub theme_id: i64,
    pub name: String,
    pub description: String,
    pub date_identified: NaiveDate,
    pub risk_rating: RiskRating,
    pub status: EventStatus,
    pub control_in_place: bool,
    pub risk_taxonomy_lv1: Vec<String>,
    pub risk_taxonomy_lv2: Vec<String>,
    pub risk_taxonomy_lv3: Vec<String>,
    pub impacted_lines: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventSort {
    #[default]
    NameAsc,
    NameDesc,
    DateAsc,
    DateDesc,
    /// Most severe first: CRITICAL, HIGH, MEDIUM, LOW
    RiskDesc,
    RiskAsc,
}

impl EventSort {
    fn order_by(&self) -> &'static str {
        match self {
            EventSort::NameAsc => "name COLLATE NOCASE ASC, id",
            EventSort::NameDesc => "name COLLATE NOCASE DESC, id",
            EventSort::DateAsc => "date_identified ASC, id",
            EventSort::DateDesc => "date_identified DESC, id",
            EventSort::RiskDesc => "risk_rank DESC, name COLLATE NOCASE, id",
            EventSort::RiskAsc => "risk_rank ASC, name COLLATE NOCASE, id",
        }
    }
}

impl FromStr for EventSort {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "name" => Ok(EventSort::NameAsc),
            "-name" => Ok(EventSort::NameDesc),
            "date" => Ok(EventSort::DateAsc),
            "-date" => Ok(EventSort::DateDesc),
            "risk" => Ok(EventSort::RiskDesc),
            "-risk" => Ok(EventSort::RiskAsc),
            other => Err(Error::InvalidInput(format!("Unknown sort '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub theme_id: Option<i64>,
    pub include_archived: bool,
    /// Substring of name or description
    pub q: Option<String>,
    pub sort: EventSort,
}

pub async fn insert<'e, E>(executor: E, input: &EventInput, created_by: Option<i64>) -> Result<i64>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO events (
            theme_id, name, description, date_identified, risk_rating, status,
            control_in_place, is_active, risk_taxonomy_lv1, risk_taxonomy_lv2,
            risk_taxonomy_lv3, impacted_lines, created_by, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(input.theme_id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(format_date(input.date_identified))
    .bind(input.risk_rating.as_str())
    .bind(input.status.as_str())
    .bind(input.control_in_place)
    .bind(encode_list(&input.risk_taxonomy_lv1))
    .bind(encode_list(&input.risk_taxonomy_lv2))
    .bind(encode_list(&input.risk_taxonomy_lv3))
    .bind(encode_list(&input.impacted_lines))
    .bind(created_by)
    .bind(now_rfc3339())
    .execute(executor)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn update<'e, E>(executor: E, id: i64, input: &EventInput) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
        UPDATE events SET
            theme_id = ?, name = ?, description = ?, date_identified = ?,
            risk_rating = ?, status = ?, control_in_place = ?,
            risk_taxonomy_lv1 = ?, risk_taxonomy_lv2 = ?, risk_taxonomy_lv3 = ?,
            impacted_lines = ?
        WHERE id = ?
        "#,
    )
    .bind(input.theme_id)
    .bind(&input.name)
    .bind(&input.description)
    .bind(format_date(input.date_identified))
    .bind(input.risk_rating.as_str())
    .bind(input.status.as_str())
    .bind(input.control_in_place)
    .bind(encode_list(&input.risk_taxonomy_lv1))
    .bind(encode_list(&input.risk_taxonomy_lv2))
    .bind(encode_list(&input.risk_taxonomy_lv3))
    .bind(encode_list(&input.impacted_lines))
    .bind(id)
    .execute(executor)
    .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Event {}", id)));
    }
    Ok(())
}

pub async fn get<'e, E>(executor: E, id: i64) -> Result<Option<Event>>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row = sqlx::query("SELECT * FROM events WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?;
    row.as_ref().map(Event::from_row).transpose()
}

pub async fn list(pool: &SqlitePool, query: &EventQuery) -> Result<Vec<Event>> {
    let pattern = query
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(|q| format!("%{}%", q));

    let sql = format!(
        r#"
        SELECT *,
            CASE risk_rating
                WHEN 'CRITICAL' THEN 4 WHEN 'HIGH' THEN 3
                WHEN 'MEDIUM' THEN 2 ELSE 1
            END AS risk_rank
        FROM events
        WHERE (? OR is_active = 1)
          AND (? IS NULL OR theme_id = ?)
          AND (? IS NULL OR name LIKE ? OR description LIKE ?)
        ORDER BY {}
        "#,
        query.sort.order_by()
    );
    let rows = sqlx::query(&sql)
        .bind(query.include_archived)
        .bind(query.theme_id)
        .bind(query.theme_id)
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .bind(pattern.as_deref())
        .fetch_all(pool)
        .await?;
    rows.iter().map(Event::from_row).collect()
}

/// Flip `is_active`; returns the new value
pub async fn toggle_active(pool: &SqlitePool, id: i64) -> Result<bool> {
    let result = sqlx::query("UPDATE events SET is_active = NOT is_active WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("Event {}", id)));
    }
    let active: bool = sqlx::query_scalar("SELECT is_active FROM events WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(active)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_keys() {
        assert_eq!("-date".parse::<EventSort>().unwrap(), EventSort::DateDesc);
        assert_eq!("risk".parse::<EventSort>().unwrap(), EventSort::RiskDesc);
        assert_eq!("-risk".parse::<EventSort>().unwrap(), EventSort::RiskAsc);
        assert!("severity".parse::<EventSort>().is_err());
    }
}
