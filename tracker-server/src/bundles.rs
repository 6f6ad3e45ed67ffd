//! Bundle Engine
//!
//! Groups an already-fetched set of source rows into bundles. Two rows
//! belong to the same bundle exactly when they share
//! `(event_id, trim(name), source_date, lower(trim(summary)))`.
//! Pure: no queries, no side effects, deterministic for a given input.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tracker_common::db::Source;

/// Derived identity of a bundle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct BundleKey {
    pub event_id: i64,
    pub name: String,
    pub source_date: NaiveDate,
    pub summary: String,
}

impl BundleKey {
    pub fn of(source: &Source) -> Self {
        Self {
            event_id: source.event_id,
            name: source.name.trim().to_string(),
            source_date: source.source_date,
            summary: normalize_summary(&source.summary),
        }
    }
}

/// Summary comparison form: trimmed, lower-cased
pub fn normalize_summary(summary: &str) -> String {
    summary.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DisplayType {
    Link,
    File,
    Mixed,
}

impl DisplayType {
    /// MIXED when both kinds are present, FILE for files only, LINK otherwise
    pub fn from_counts(link_count: usize, file_count: usize) -> Self {
        match (link_count > 0, file_count > 0) {
            (true, true) => DisplayType::Mixed,
            (false, true) => DisplayType::File,
            _ => DisplayType::Link,
        }
    }
}

impl FromStr for DisplayType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LINK" => Ok(DisplayType::Link),
            "FILE" => Ok(DisplayType::File),
            "MIXED" => Ok(DisplayType::Mixed),
            other => Err(format!("Unknown source type '{}'", other)),
        }
    }
}

/// Output ordering; list views and detail views use different ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BundleOrder {
    /// Leader name, case-insensitive ascending
    #[default]
    NameAsc,
    /// Leader source date, newest first
    DateDesc,
}

impl FromStr for BundleOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "name" => Ok(BundleOrder::NameAsc),
            "date" | "-date" => Ok(BundleOrder::DateDesc),
            other => Err(format!("Unknown order '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub key: BundleKey,
    /// Lowest-id member
    pub leader: Source,
    /// Every member including the leader, in id order
    pub members: Vec<Source>,
    pub link_count: usize,
    pub file_count: usize,
    pub any_active: bool,
    pub display_type: DisplayType,
}

impl Bundle {
    pub fn siblings(&self) -> impl Iterator<Item = &Source> {
        let leader_id = self.leader.id;
        self.members.iter().filter(move |s| s.id != leader_id)
    }
}

/// Partition `sources` into bundles and sort them
pub fn build_bundles(sources: Vec<Source>, order: BundleOrder) -> Vec<Bundle> {
    let mut index: HashMap<BundleKey, usize> = HashMap::new();
    let mut groups: Vec<(BundleKey, Vec<Source>)> = Vec::new();

    for source in sources {
        let key = BundleKey::of(&source);
        match index.get(&key) {
            Some(&i) => groups[i].1.push(source),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![source]));
            }
        }
    }

    let mut bundles: Vec<Bundle> = groups
        .into_iter()
        .filter_map(|(key, mut members)| {
            members.sort_by_key(|s| s.id);
            let leader = members.first()?.clone();
            let link_count = members.iter().filter(|s| s.has_link()).count();
            let file_count = members.iter().filter(|s| s.has_file()).count();
            Some(Bundle {
                key,
                any_active: members.iter().any(|s| s.is_active),
                display_type: DisplayType::from_counts(link_count, file_count),
                leader,
                members,
                link_count,
                file_count,
            })
        })
        .collect();

    sort_bundles(&mut bundles, order);
    bundles
}

/// Ties fall back to the leader id so the result is total
pub fn sort_bundles(bundles: &mut [Bundle], order: BundleOrder) {
    match order {
        BundleOrder::NameAsc => bundles.sort_by(|a, b| {
            a.leader
                .name
                .to_lowercase()
                .cmp(&b.leader.name.to_lowercase())
                .then(a.leader.id.cmp(&b.leader.id))
        }),
        BundleOrder::DateDesc => bundles.sort_by(|a, b| {
            b.leader
                .source_date
                .cmp(&a.leader.source_date)
                .then(a.leader.id.cmp(&b.leader.id))
        }),
    }
}

/// Keep bundles of one display type; `None` keeps everything
pub fn filter_by_type(bundles: Vec<Bundle>, display_type: Option<DisplayType>) -> Vec<Bundle> {
    match display_type {
        None => bundles,
        Some(wanted) => bundles.into_iter().filter(|b| b.display_type == wanted).collect(),
    }
}
