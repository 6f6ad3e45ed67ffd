//! Form validation for sources and events
//!
//! Pure functions from submitted strings to validated records or
//! `FormErrors`. No database access; uniqueness checks live in the workflow.

use serde::{Deserialize, Serialize};
use tracker_common::db::{EventStatus, OnsetTimeline, PotentialImpact, RiskRating};
use tracker_common::taxonomy;
use tracker_common::time::parse_date;

use crate::db::events::EventInput;
use crate::db::sources::SourceFields;
use crate::db::themes::NewTheme;
use crate::error::FormErrors;

pub const SOURCE_NAME_MAX: usize = 255;
pub const EVENT_NAME_MAX: usize = 30;
pub const THEME_NAME_MAX: usize = 200;

/// Source fields exactly as submitted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceFormInput {
    pub name: String,
    pub source_date: String,
    pub summary: String,
    pub potential_impact: String,
    pub potential_impact_notes: String,
    /// Primary link (URL or `mailto:`)
    pub link_or_file: String,
}

/// Accepts `http://host...`, `https://host...` or `mailto:user@domain`
pub fn validate_link(link: &str) -> Result<(), String> {
    let link = link.trim();
    let lower = link.to_ascii_lowercase();

    if let Some(rest) = lower.strip_prefix("mailto:") {
        let address = rest.split('?').next().unwrap_or("");
        return match address.split_once('@') {
            Some((user, domain)) if !user.is_empty() && !domain.is_empty() => Ok(()),
            _ => Err(format!("'{}' is not a valid mailto: address", link)),
        };
    }

    for scheme in ["http://", "https://"] {
        if let Some(rest) = lower.strip_prefix(scheme) {
            let host = rest.split(['/', '?', '#']).next().unwrap_or("");
            if host.is_empty() || host.chars().any(char::is_whitespace) {
                return Err(format!("'{}' has no host", link));
            }
            return Ok(());
        }
    }

    Err(format!(
        "'{}' must start with http://, https:// or mailto:",
        link
    ))
}

pub fn is_mailto(link: &str) -> bool {
    link.trim().to_ascii_lowercase().starts_with("mailto:")
}

/// Validate descriptive fields and the primary link
pub fn validate_source_fields(input: &SourceFormInput) -> Result<SourceFields, FormErrors> {
    let mut errors = FormErrors::new();

    let name = input.name.trim().to_string();
    if name.is_empty() {
        errors.add("name", "This field is required.");
    } else if name.chars().count() > SOURCE_NAME_MAX {
        errors.add("name", format!("Ensure this value has at most {} characters.", SOURCE_NAME_MAX));
    }

    let source_date = if input.source_date.trim().is_empty() {
        errors.add("source_date", "This field is required.");
        None
    } else {
        match parse_date(&input.source_date) {
            Ok(date) => Some(date),
            Err(_) => {
                errors.add("source_date", "Enter a valid date (YYYY-MM-DD).");
                None
            }
        }
    };

    let summary = input.summary.trim().to_string();
    if summary.is_empty() {
        errors.add("summary", "This field is required.");
    }

    let potential_impact = match input.potential_impact.trim() {
        "" => None,
        raw => match raw.parse::<PotentialImpact>() {
            Ok(impact) => Some(impact),
            Err(_) => {
                errors.add("potential_impact", format!("Select a valid choice. {} is not one of the available choices.", raw));
                None
            }
        },
    };

    if !input.link_or_file.trim().is_empty() {
        if let Err(message) = validate_link(&input.link_or_file) {
            errors.add("link_or_file", message);
        }
    }

    match source_date {
        Some(source_date) if errors.is_empty() => Ok(SourceFields {
            name,
            source_date,
            summary,
            potential_impact,
            potential_impact_notes: input.potential_impact_notes.trim().to_string(),
        }),
        _ => Err(errors),
    }
}

/// Check every extra link; messages are attached to `extra_links`
pub fn validate_extra_links(links: &[String], errors: &mut FormErrors) {
    for (index, link) in links.iter().enumerate() {
        if let Err(message) = validate_link(link) {
            errors.add("extra_links", format!("Link #{}: {}", index + 1, message));
        }
    }
}

/// Extra links as typed, blanks removed
pub fn clean_extra_links(links: &[String]) -> Vec<String> {
    links
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Theme fields as submitted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeForm {
    pub category_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub risk_rating: String,
    pub onset_timeline: String,
}

fn required_choice<T: std::str::FromStr>(raw: &str, field: &str, errors: &mut FormErrors) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() {
        errors.add(field, "This field is required.");
        return None;
    }
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.add(field, format!("Select a valid choice. {} is not one of the available choices.", raw));
            None
        }
    }
}

/// Validate a theme submission; the category's existence is checked by the caller
pub fn validate_theme(form: &ThemeForm) -> Result<NewTheme, FormErrors> {
    let mut errors = FormErrors::new();

    if form.category_id.is_none() {
        errors.add("category_id", "This field is required.");
    }
    let name = form.name.trim().to_string();
    if name.is_empty() {
        errors.add("name", "This field is required.");
    } else if name.chars().count() > THEME_NAME_MAX {
        errors.add("name", format!("Ensure this value has at most {} characters.", THEME_NAME_MAX));
    }
    let risk_rating = required_choice::<RiskRating>(&form.risk_rating, "risk_rating", &mut errors);
    let onset_timeline = required_choice::<OnsetTimeline>(&form.onset_timeline, "onset_timeline", &mut errors);

    match (form.category_id, risk_rating, onset_timeline) {
        (Some(category_id), Some(risk_rating), Some(onset_timeline)) if errors.is_empty() => Ok(NewTheme {
            category_id,
            name,
            description: form.description.trim().to_string(),
            risk_rating,
            onset_timeline,
        }),
        _ => Err(errors),
    }
}

/// Event fields as submitted
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EventForm {
    pub theme_id: Option<i64>,
    pub name: String,
    pub description: String,
    pub date_identified: String,
    /// Defaults to the theme's rating when empty
    pub risk_rating: Option<String>,
    pub status: Option<String>,
    pub control_in_place: bool,
    pub risk_taxonomy_lv1: Vec<String>,
    pub risk_taxonomy_lv2: Vec<String>,
    pub risk_taxonomy_lv3: Vec<String>,
    pub impacted_lines: Vec<String>,
}

/// Validate an event submission
///
/// `theme_rating` is the owning theme's risk rating, used when the form
/// leaves the rating empty.
pub fn validate_event(form: &EventForm, theme_rating: Option<RiskRating>) -> Result<EventInput, FormErrors> {
    let mut errors = FormErrors::new();

    let theme_id = form.theme_id;
    if theme_id.is_none() {
        errors.add("theme_id", "This field is required.");
    }

    let name = form.name.trim().to_string();
    if name.is_empty() {
        errors.add("name", "This field is required.");
    } else if name.chars().count() > EVENT_NAME_MAX {
        errors.add(
            "name",
            format!(
                "Ensure this value has at most {} characters (it has {}).",
                EVENT_NAME_MAX,
                name.chars().count()
            ),
        );
    }

    let description = form.description.trim().to_string();
    if description.is_empty() {
        errors.add("description", "This field is required.");
    }

    let date_identified = match parse_date(&form.date_identified) {
        Ok(date) => Some(date),
        Err(_) => {
            errors.add("date_identified", "Enter a valid date (YYYY-MM-DD).");
            None
        }
    };

    let risk_rating = match form.risk_rating.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
        Some(raw) => raw.parse::<RiskRating>().map_err(|_| raw.to_string()),
        None => theme_rating.ok_or_else(String::new),
    };
    let risk_rating = match risk_rating {
        Ok(rating) => Some(rating),
        Err(raw) if raw.is_empty() => {
            errors.add("risk_rating", "This field is required.");
            None
        }
        Err(raw) => {
            errors.add("risk_rating", format!("Select a valid choice. {} is not one of the available choices.", raw));
            None
        }
    };

    let status = match form.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => Some(EventStatus::Open),
        Some(raw) => match raw.parse::<EventStatus>() {
            Ok(status) => Some(status),
            Err(_) => {
                errors.add("status", format!("Select a valid choice. {} is not one of the available choices.", raw));
                None
            }
        },
    };

    for violation in taxonomy::validate_hierarchy(
        &form.risk_taxonomy_lv1,
        &form.risk_taxonomy_lv2,
        &form.risk_taxonomy_lv3,
    ) {
        errors.add(violation.field(), violation.to_string());
    }

    let unknown_lines = taxonomy::unknown_lines(&form.impacted_lines);
    for line in &unknown_lines {
        errors.add(
            "impacted_lines",
            format!("Select a valid choice. {} is not one of the available choices.", line),
        );
    }
    let impacted_lines = taxonomy::expand_impacted_lines(&form.impacted_lines);
    if impacted_lines.is_empty() && unknown_lines.is_empty() {
        errors.add("impacted_lines", "Select at least one line of business.");
    }

    match (theme_id, date_identified, risk_rating, status) {
        (Some(theme_id), Some(date_identified), Some(risk_rating), Some(status)) if errors.is_empty() => {
            Ok(EventInput {
                theme_id,
                name,
                description,
                date_identified,
                risk_rating,
                status,
                control_in_place: form.control_in_place,
                risk_taxonomy_lv1: form.risk_taxonomy_lv1.clone(),
                risk_taxonomy_lv2: form.risk_taxonomy_lv2.clone(),
                risk_taxonomy_lv3: form.risk_taxonomy_lv3.clone(),
                impacted_lines,
            })
        }
        _ => Err(errors),
    }
}
