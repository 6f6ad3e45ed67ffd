//! Entity records and their enumerations
//!
//! Rows are mapped by hand from `SqliteRow`. Identifiers are integers,
//! timestamps RFC 3339 TEXT, dates `YYYY-MM-DD` TEXT, multi-select lists
//! JSON arrays in TEXT columns.

use crate::time::{format_date, parse_date, parse_timestamp};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declares a string-backed enum stored as its upper-case key
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $key:literal, $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $key)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $key,)+
                }
            }

            pub fn label(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                match s.trim().to_ascii_uppercase().as_str() {
                    $($key => Ok($name::$variant),)+
                    other => Err(Error::InvalidInput(format!(
                        "Invalid {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

string_enum!(
    /// Severity of a theme or event
    RiskRating {
        Low => "LOW", "Low",
        Medium => "MEDIUM", "Medium",
        High => "HIGH", "High",
        Critical => "CRITICAL", "Critical",
    }
);

impl RiskRating {
    /// Higher is more severe
    pub fn rank(&self) -> u8 {
        match self {
            RiskRating::Low => 1,
            RiskRating::Medium => 2,
            RiskRating::High => 3,
            RiskRating::Critical => 4,
        }
    }
}

string_enum!(
    EventStatus {
        Open => "OPEN", "Open",
        Monitoring => "MONITORING", "Monitoring",
        Mitigated => "MITIGATED", "Mitigated",
        Closed => "CLOSED", "Closed",
    }
);

string_enum!(
    /// Expected time until a theme materialises
    OnsetTimeline {
        Immediate => "IMMEDIATE", "Immediate (0-3 months)",
        ShortTerm => "SHORT_TERM", "Short term (3-12 months)",
        MediumTerm => "MEDIUM_TERM", "Medium term (1-3 years)",
        LongTerm => "LONG_TERM", "Long term (3+ years)",
    }
);

string_enum!(
    /// Direction a source suggests the risk is moving
    PotentialImpact {
        Escalating => "ESCALATING", "Escalating",
        Maintaining => "MAINTAINING", "Maintaining",
        Decreasing => "DECREASING", "Decreasing",
    }
);

string_enum!(
    /// Derived from the row: FILE when a file is attached, LINK otherwise
    SourceType {
        File => "FILE", "File",
        Link => "LINK", "Link",
    }
);

string_enum!(
    /// Slot a staged file occupies within its batch
    UploadKind {
        Main => "MAIN", "Main file",
        Extra => "EXTRA", "Additional file",
    }
);

impl SourceType {
    /// FILE takes precedence when both a file and a link are present
    pub fn derive(has_file: bool) -> Self {
        if has_file {
            SourceType::File
        } else {
            SourceType::Link
        }
    }
}

fn decode_enum<T: FromStr<Err = Error>>(row: &SqliteRow, column: &str) -> Result<T> {
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|_| Error::Internal(format!("Unexpected value '{}' in column {}", raw, column)))
}

fn decode_optional_enum<T: FromStr<Err = Error>>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    let raw: Option<String> = row.try_get(column)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| Error::Internal(format!("Unexpected value '{}' in column {}", value, column))),
    }
}

fn decode_timestamp(row: &SqliteRow, column: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.try_get(column)?;
    parse_timestamp(&raw)
}

fn decode_date(row: &SqliteRow, column: &str) -> Result<NaiveDate> {
    let raw: String = row.try_get(column)?;
    parse_date(&raw).map_err(|_| Error::Internal(format!("Bad date '{}' in column {}", raw, column)))
}

fn decode_list(row: &SqliteRow, column: &str) -> Result<Vec<String>> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        None => Ok(Vec::new()),
        Some(text) if text.trim().is_empty() => Ok(Vec::new()),
        Some(text) => serde_json::from_str(&text)
            .map_err(|e| Error::Internal(format!("Bad JSON list in column {}: {}", column, e))),
    }
}

fn decode_token(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let raw: String = row.try_get(column)?;
    Uuid::parse_str(&raw).map_err(|e| Error::Internal(format!("Bad token in column {}: {}", column, e)))
}

/// Encode a multi-select list for storage
pub fn encode_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            is_staff: row.try_get("is_staff")?,
            is_superuser: row.try_get("is_superuser")?,
            is_active: row.try_get("is_active")?,
            created_at: decode_timestamp(row, "created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
}

impl Category {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
        })
    }
}

/// Theme joined with its category name
#[derive(Debug, Clone, Serialize)]
pub struct Theme {
    pub id: i64,
    pub category_id: i64,
    pub category_name: String,
    pub name: String,
    pub description: String,
    pub risk_rating: RiskRating,
    pub onset_timeline: OnsetTimeline,
    pub is_active: bool,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Theme {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            category_id: row.try_get("category_id")?,
            category_name: row.try_get("category_name")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            risk_rating: decode_enum(row, "risk_rating")?,
            onset_timeline: decode_enum(row, "onset_timeline")?,
            is_active: row.try_get("is_active")?,
            created_by: row.try_get("created_by")?,
            created_at: decode_timestamp(row, "created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: i64,
    pub theme_id: i64,
    pub name: String,
    pub description: String,
    pub date_identified: NaiveDate,
    pub risk_rating: RiskRating,
    pub status: EventStatus,
    pub control_in_place: bool,
    pub is_active: bool,
    pub risk_taxonomy_lv1: Vec<String>,
    pub risk_taxonomy_lv2: Vec<String>,
    pub risk_taxonomy_lv3: Vec<String>,
    pub impacted_lines: Vec<String>,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            theme_id: row.try_get("theme_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            date_identified: decode_date(row, "date_identified")?,
            risk_rating: decode_enum(row, "risk_rating")?,
            status: decode_enum(row, "status")?,
            control_in_place: row.try_get("control_in_place")?,
            is_active: row.try_get("is_active")?,
            risk_taxonomy_lv1: decode_list(row, "risk_taxonomy_lv1")?,
            risk_taxonomy_lv2: decode_list(row, "risk_taxonomy_lv2")?,
            risk_taxonomy_lv3: decode_list(row, "risk_taxonomy_lv3")?,
            impacted_lines: decode_list(row, "impacted_lines")?,
            created_by: row.try_get("created_by")?,
            created_at: decode_timestamp(row, "created_at")?,
        })
    }
}

/// One evidentiary row: a bundle leader or one of its siblings
#[derive(Debug, Clone, Serialize)]
pub struct Source {
    pub id: i64,
    pub event_id: i64,
    pub bundle_id: String,
    pub name: String,
    pub source_date: NaiveDate,
    pub summary: String,
    pub potential_impact: Option<PotentialImpact>,
    pub potential_impact_notes: String,
    /// URL or `mailto:` URI; empty when the row carries a file
    pub link_or_file: String,
    /// Storage key of the attached file
    pub file_upload: Option<String>,
    /// Name the attached file was uploaded under
    pub file_name: Option<String>,
    pub source_type: SourceType,
    pub is_active: bool,
    pub download_token: Uuid,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Source {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let file_upload: Option<String> = row.try_get("file_upload")?;
        Ok(Self {
            id: row.try_get("id")?,
            event_id: row.try_get("event_id")?,
            bundle_id: row.try_get("bundle_id")?,
            name: row.try_get("name")?,
            source_date: decode_date(row, "source_date")?,
            summary: row.try_get("summary")?,
            potential_impact: decode_optional_enum(row, "potential_impact")?,
            potential_impact_notes: row.try_get("potential_impact_notes")?,
            link_or_file: row.try_get("link_or_file")?,
            file_upload: file_upload.filter(|f| !f.is_empty()),
            file_name: row.try_get("file_name")?,
            source_type: decode_enum(row, "source_type")?,
            is_active: row.try_get("is_active")?,
            download_token: decode_token(row, "download_token")?,
            created_by: row.try_get("created_by")?,
            created_at: decode_timestamp(row, "created_at")?,
        })
    }

    pub fn has_file(&self) -> bool {
        self.file_upload.is_some()
    }

    pub fn has_link(&self) -> bool {
        !self.link_or_file.trim().is_empty()
    }

    /// Uploaded name of the attached file, falling back to the key's last segment
    pub fn attached_file_name(&self) -> Option<&str> {
        let key = self.file_upload.as_deref()?;
        match self.file_name.as_deref() {
            Some(name) if !name.is_empty() => Some(name),
            _ => key.rsplit('/').next(),
        }
    }

    pub fn source_date_str(&self) -> String {
        format_date(self.source_date)
    }
}

/// Immutable snapshot of a replaced main file
#[derive(Debug, Clone, Serialize)]
pub struct SourceFileVersion {
    pub id: i64,
    pub source_id: i64,
    pub file: String,
    pub original_name: String,
    pub download_token: Uuid,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl SourceFileVersion {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            source_id: row.try_get("source_id")?,
            file: row.try_get("file")?,
            original_name: row.try_get("original_name")?,
            download_token: decode_token(row, "download_token")?,
            created_by: row.try_get("created_by")?,
            created_at: decode_timestamp(row, "created_at")?,
        })
    }
}

/// File held in the staging area for one batch
#[derive(Debug, Clone, Serialize)]
pub struct TempUpload {
    pub id: i64,
    pub batch_id: String,
    pub kind: UploadKind,
    /// Storage key under `tmp/<batch>/`
    pub file: String,
    pub original_name: String,
    pub size_bytes: i64,
    pub user_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl TempUpload {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            batch_id: row.try_get("batch_id")?,
            kind: decode_enum(row, "kind")?,
            file: row.try_get("file")?,
            original_name: row.try_get("original_name")?,
            size_bytes: row.try_get("size_bytes")?,
            user_id: row.try_get("user_id")?,
            created_at: decode_timestamp(row, "created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadLog {
    pub id: i64,
    pub user_id: Option<i64>,
    pub ip: Option<String>,
    pub user_agent: String,
    pub object_key: String,
    pub token: String,
    pub served_at: DateTime<Utc>,
}

impl DownloadLog {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            object_key: row.try_get("object_key")?,
            token: row.try_get("token")?,
            served_at: decode_timestamp(row, "served_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UserAccessLog {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub ip: Option<String>,
    pub user_agent: String,
    pub login_at: DateTime<Utc>,
}

impl UserAccessLog {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            ip: row.try_get("ip")?,
            user_agent: row.try_get("user_agent")?,
            login_at: decode_timestamp(row, "login_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_parse_is_case_insensitive() {
        assert_eq!("critical".parse::<RiskRating>().unwrap(), RiskRating::Critical);
        assert_eq!(" Open ".parse::<EventStatus>().unwrap(), EventStatus::Open);
        assert!("SEVERE".parse::<RiskRating>().is_err());
    }

    #[test]
    fn test_risk_rank_order() {
        assert!(RiskRating::Critical.rank() > RiskRating::High.rank());
        assert!(RiskRating::Medium.rank() > RiskRating::Low.rank());
    }

    #[test]
    fn test_source_type_derive_prefers_file() {
        assert_eq!(SourceType::derive(true), SourceType::File);
        assert_eq!(SourceType::derive(false), SourceType::Link);
    }

    #[test]
    fn test_enum_serde_uses_keys() {
        let json = serde_json::to_string(&PotentialImpact::Escalating).unwrap();
        assert_eq!(json, "\"ESCALATING\"");
        let kind: UploadKind = serde_json::from_str("\"EXTRA\"").unwrap();
        assert_eq!(kind, UploadKind::Extra);
    }

    #[test]
    fn test_encode_list() {
        assert_eq!(encode_list(&["A".to_string(), "B".to_string()]), "[\"A\",\"B\"]");
        assert_eq!(encode_list(&[]), "[]");
    }
}
