//! Static reference data: risk taxonomy levels 1-3 and lines of business
//!
//! Level 2 keys are children of level 1 keys, level 3 keys are children of
//! level 2 keys. A child may appear under more than one parent; option
//! lists derived from several parents are deduplicated with order kept.

use serde::Serialize;
use std::collections::HashSet;

/// `(key, label)` pair
pub type Choice = (&'static str, &'static str);

/// Sentinel in impacted lines meaning every concrete line of business
pub const ALL_LINES: &str = "All";

pub const LINE_OF_BUSINESS_CHOICES: &[Choice] = &[
    ("All", "All lines of business"),
    ("RETAIL", "Retail Banking"),
    ("COMMERCIAL", "Commercial Banking"),
    ("WEALTH", "Wealth Management"),
    ("INSURANCE", "Insurance"),
    ("TREASURY", "Treasury & Markets"),
    ("CORPORATE", "Corporate Functions"),
];

pub const RISK_TAXONOMY_LV1: &[Choice] = &[
    ("OPERATIONAL", "Operational"),
    ("COMPLIANCE", "Compliance"),
    ("TECHNOLOGY", "Technology"),
    ("FINANCIAL", "Financial"),
    ("STRATEGIC", "Strategic"),
];

pub const RISK_TAXONOMY_LV2: &[(&str, &[Choice])] = &[
    (
        "OPERATIONAL",
        &[
            ("PROCESS", "Process Execution"),
            ("PEOPLE", "People"),
            ("THIRD_PARTY", "Third Party"),
            ("FRAUD", "Fraud"),
        ],
    ),
    (
        "COMPLIANCE",
        &[
            ("REGULATORY", "Regulatory Change"),
            ("CONDUCT", "Conduct"),
            ("FRAUD", "Fraud"),
            ("DATA_PRIVACY", "Data Privacy"),
        ],
    ),
    (
        "TECHNOLOGY",
        &[
            ("CYBER", "Cyber Security"),
            ("IT_RESILIENCE", "IT Resilience"),
            ("DATA_PRIVACY", "Data Privacy"),
        ],
    ),
    (
        "FINANCIAL",
        &[
            ("CREDIT", "Credit"),
            ("MARKET", "Market"),
            ("LIQUIDITY", "Liquidity"),
        ],
    ),
    (
        "STRATEGIC",
        &[
            ("BUSINESS_MODEL", "Business Model"),
            ("REPUTATION", "Reputation"),
        ],
    ),
];

pub const RISK_TAXONOMY_LV3: &[(&str, &[Choice])] = &[
    (
        "PROCESS",
        &[
            ("TRANSACTION_ERROR", "Transaction Error"),
            ("CHANGE_MANAGEMENT", "Change Management"),
        ],
    ),
    (
        "PEOPLE",
        &[
            ("KEY_PERSON", "Key Person Dependency"),
            ("HEALTH_SAFETY", "Health & Safety"),
        ],
    ),
    (
        "THIRD_PARTY",
        &[
            ("VENDOR_FAILURE", "Vendor Failure"),
            ("OUTSOURCING", "Outsourcing"),
        ],
    ),
    (
        "FRAUD",
        &[
            ("INTERNAL_FRAUD", "Internal Fraud"),
            ("EXTERNAL_FRAUD", "External Fraud"),
        ],
    ),
    (
        "REGULATORY",
        &[
            ("REPORTING", "Regulatory Reporting"),
            ("LICENSING", "Licensing"),
        ],
    ),
    (
        "CONDUCT",
        &[
            ("MIS_SELLING", "Mis-selling"),
            ("MARKET_ABUSE", "Market Abuse"),
        ],
    ),
    (
        "DATA_PRIVACY",
        &[
            ("DATA_BREACH", "Data Breach"),
            ("RETENTION", "Data Retention"),
        ],
    ),
    (
        "CYBER",
        &[
            ("RANSOMWARE", "Ransomware"),
            ("PHISHING", "Phishing"),
            ("DATA_BREACH", "Data Breach"),
        ],
    ),
    (
        "IT_RESILIENCE",
        &[
            ("OUTAGE", "System Outage"),
            ("CAPACITY", "Capacity"),
        ],
    ),
    (
        "CREDIT",
        &[
            ("DEFAULT", "Counterparty Default"),
            ("CONCENTRATION", "Concentration"),
        ],
    ),
    (
        "MARKET",
        &[
            ("INTEREST_RATE", "Interest Rate"),
            ("FX", "Foreign Exchange"),
        ],
    ),
    ("LIQUIDITY", &[("FUNDING", "Funding")]),
    (
        "BUSINESS_MODEL",
        &[
            ("COMPETITION", "Competition"),
            ("PRODUCT", "Product Viability"),
        ],
    ),
    (
        "REPUTATION",
        &[
            ("MEDIA", "Adverse Media"),
            ("CUSTOMER_TRUST", "Customer Trust"),
        ],
    ),
];

/// Which field a hierarchy violation belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaxonomyError {
    /// No level 1 option selected
    MissingLevel1,
    /// Level 1 keys not in the taxonomy
    InvalidLevel1 { invalid: Vec<String> },
    /// Level 2 keys not children of any selected level 1 key
    InvalidLevel2 { invalid: Vec<String>, valid: Vec<String> },
    /// Level 3 keys not children of any selected level 2 key
    InvalidLevel3 { invalid: Vec<String>, valid: Vec<String> },
}

impl TaxonomyError {
    /// Form field the message is attached to
    pub fn field(&self) -> &'static str {
        match self {
            TaxonomyError::MissingLevel1 | TaxonomyError::InvalidLevel1 { .. } => "risk_taxonomy_lv1",
            TaxonomyError::InvalidLevel2 { .. } => "risk_taxonomy_lv2",
            TaxonomyError::InvalidLevel3 { .. } => "risk_taxonomy_lv3",
        }
    }
}

impl std::fmt::Display for TaxonomyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaxonomyError::MissingLevel1 => write!(f, "Select at least one Level 1 option"),
            TaxonomyError::InvalidLevel1 { invalid } => write!(
                f,
                "Select a valid choice. {} is not one of the available choices.",
                invalid.join(", ")
            ),
            TaxonomyError::InvalidLevel2 { invalid, valid } => write!(
                f,
                "Invalid Level 2 options: {}. Valid options for selected Level 1: {}",
                invalid.join(", "),
                valid.join(", ")
            ),
            TaxonomyError::InvalidLevel3 { invalid, valid } => write!(
                f,
                "Invalid Level 3 options: {}. Valid options for selected Level 2: {}",
                invalid.join(", "),
                valid.join(", ")
            ),
        }
    }
}

fn children_of(table: &'static [(&'static str, &'static [Choice])], parent: &str) -> &'static [Choice] {
    table
        .iter()
        .find(|(key, _)| *key == parent)
        .map(|(_, children)| *children)
        .unwrap_or(&[])
}

fn dedup_children<S: AsRef<str>>(
    table: &'static [(&'static str, &'static [Choice])],
    parents: &[S],
) -> Vec<Choice> {
    let mut seen = HashSet::new();
    parents
        .iter()
        .flat_map(|p| children_of(table, p.as_ref()).iter().copied())
        .filter(|(key, _)| seen.insert(*key))
        .collect()
}

/// Level 2 options allowed for the given level 1 selection
pub fn valid_lv2_options<S: AsRef<str>>(lv1: &[S]) -> Vec<Choice> {
    dedup_children(RISK_TAXONOMY_LV2, lv1)
}

/// Level 3 options allowed for the given level 2 selection
pub fn valid_lv3_options<S: AsRef<str>>(lv2: &[S]) -> Vec<Choice> {
    dedup_children(RISK_TAXONOMY_LV3, lv2)
}

/// Check lv2 ⊆ children(lv1) and lv3 ⊆ children(lv2)
///
/// Unknown level 1 keys are rejected, and each lower level is only checked
/// once the level above it is valid.
pub fn validate_hierarchy(lv1: &[String], lv2: &[String], lv3: &[String]) -> Vec<TaxonomyError> {
    if lv1.is_empty() {
        return vec![TaxonomyError::MissingLevel1];
    }
    let invalid_lv1: Vec<String> = lv1.iter().filter(|k| lv1_label(k).is_none()).cloned().collect();
    if !invalid_lv1.is_empty() {
        return vec![TaxonomyError::InvalidLevel1 { invalid: invalid_lv1 }];
    }

    let valid_lv2: Vec<String> = valid_lv2_options(&lv1).iter().map(|(k, _)| k.to_string()).collect();
    let invalid_lv2: Vec<String> = lv2.iter().filter(|k| !valid_lv2.contains(k)).cloned().collect();
    if !invalid_lv2.is_empty() {
        return vec![TaxonomyError::InvalidLevel2 { invalid: invalid_lv2, valid: valid_lv2 }];
    }

    let valid_lv3: Vec<String> = valid_lv3_options(lv2).iter().map(|(k, _)| k.to_string()).collect();
    let invalid_lv3: Vec<String> = lv3.iter().filter(|k| !valid_lv3.contains(k)).cloned().collect();
    if !invalid_lv3.is_empty() {
        return vec![TaxonomyError::InvalidLevel3 { invalid: invalid_lv3, valid: valid_lv3 }];
    }

    Vec::new()
}

/// Selected line keys that are neither a line of business nor "All"
pub fn unknown_lines(selected: &[String]) -> Vec<String> {
    selected.iter().filter(|s| line_label(s).is_none()).cloned().collect()
}

/// Replace the "All" sentinel with every concrete line of business
///
/// Duplicates collapse. Callers reject [`unknown_lines`] first; any left
/// over are dropped here.
pub fn expand_impacted_lines(selected: &[String]) -> Vec<String> {
    if selected.iter().any(|s| s == ALL_LINES) {
        return LINE_OF_BUSINESS_CHOICES
            .iter()
            .filter(|(key, _)| *key != ALL_LINES)
            .map(|(key, _)| key.to_string())
            .collect();
    }
    let mut seen = HashSet::new();
    selected
        .iter()
        .filter(|s| line_label(s).is_some())
        .filter(|s| seen.insert(s.as_str()))
        .cloned()
        .collect()
}

pub fn lv1_label(key: &str) -> Option<&'static str> {
    RISK_TAXONOMY_LV1.iter().find(|(k, _)| *k == key).map(|(_, l)| *l)
}

pub fn lv2_label(key: &str) -> Option<&'static str> {
    RISK_TAXONOMY_LV2
        .iter()
        .flat_map(|(_, children)| children.iter())
        .find(|(k, _)| *k == key)
        .map(|(_, l)| *l)
}

pub fn lv3_label(key: &str) -> Option<&'static str> {
    RISK_TAXONOMY_LV3
        .iter()
        .flat_map(|(_, children)| children.iter())
        .find(|(k, _)| *k == key)
        .map(|(_, l)| *l)
}

pub fn line_label(key: &str) -> Option<&'static str> {
    LINE_OF_BUSINESS_CHOICES.iter().find(|(k, _)| *k == key).map(|(_, l)| *l)
}

/// Labels for stored keys; unknown keys are shown as-is
pub fn labels<F>(keys: &[String], lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<&'static str>,
{
    keys.iter()
        .map(|k| lookup(k).map(str::to_string).unwrap_or_else(|| k.clone()))
        .collect()
}

/// Node of the hierarchical taxonomy tree
#[derive(Debug, Clone, Serialize)]
pub struct TaxonomyNode {
    pub key: &'static str,
    pub label: &'static str,
    pub selected: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TaxonomyNode>,
}

/// Full lv1 → lv2 → lv3 tree with `selected` flags from a stored selection
pub fn tree(lv1: &[String], lv2: &[String], lv3: &[String]) -> Vec<TaxonomyNode> {
    let is_in = |set: &[String], key: &str| set.iter().any(|s| s == key);
    RISK_TAXONOMY_LV1
        .iter()
        .map(|(k1, l1)| TaxonomyNode {
            key: k1,
            label: l1,
            selected: is_in(lv1, k1),
            children: children_of(RISK_TAXONOMY_LV2, k1)
                .iter()
                .map(|(k2, l2)| TaxonomyNode {
                    key: k2,
                    label: l2,
                    selected: is_in(lv2, k2),
                    children: children_of(RISK_TAXONOMY_LV3, k2)
                        .iter()
                        .map(|(k3, l3)| TaxonomyNode {
                            key: k3,
                            label: l3,
                            selected: is_in(lv3, k3),
                            children: Vec::new(),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lv2_options_dedup_keeps_first_order() {
        let options = valid_lv2_options(&["COMPLIANCE", "OPERATIONAL"]);
        let keys: Vec<&str> = options.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec!["REGULATORY", "CONDUCT", "FRAUD", "DATA_PRIVACY", "PROCESS", "PEOPLE", "THIRD_PARTY"]
        );
    }

    #[test]
    fn test_lv3_options_unknown_parent_is_empty() {
        assert!(valid_lv3_options(&["NOPE"]).is_empty());
        let empty: [&str; 0] = [];
        assert!(valid_lv3_options(&empty).is_empty());
    }

    #[test]
    fn test_validate_requires_lv1() {
        let errors = validate_hierarchy(&[], &[], &[]);
        assert_eq!(errors, vec![TaxonomyError::MissingLevel1]);
        assert_eq!(errors[0].field(), "risk_taxonomy_lv1");
    }

    #[test]
    fn test_validate_rejects_unknown_lv1() {
        let errors = validate_hierarchy(&strings(&["bogus"]), &[], &[]);
        assert_eq!(errors, vec![TaxonomyError::InvalidLevel1 { invalid: strings(&["bogus"]) }]);
        assert_eq!(errors[0].field(), "risk_taxonomy_lv1");

        // A valid key alongside does not hide the unknown one
        let errors = validate_hierarchy(&strings(&["TECHNOLOGY", "bogus"]), &strings(&["CYBER"]), &[]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field(), "risk_taxonomy_lv1");
        assert!(errors[0].to_string().contains("bogus"));
    }

    #[test]
    fn test_validate_rejects_orphan_lv2() {
        let errors = validate_hierarchy(&strings(&["FINANCIAL"]), &strings(&["CYBER"]), &[]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field(), "risk_taxonomy_lv2");
        assert!(errors[0].to_string().contains("CYBER"));
    }

    #[test]
    fn test_validate_rejects_orphan_lv3() {
        let errors = validate_hierarchy(
            &strings(&["TECHNOLOGY"]),
            &strings(&["CYBER"]),
            &strings(&["FUNDING"]),
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field(), "risk_taxonomy_lv3");
    }

    #[test]
    fn test_validate_accepts_shared_child() {
        let errors = validate_hierarchy(
            &strings(&["TECHNOLOGY"]),
            &strings(&["CYBER", "DATA_PRIVACY"]),
            &strings(&["DATA_BREACH", "PHISHING"]),
        );
        assert!(errors.is_empty());
    }

    #[test]
    fn test_expand_all_lines() {
        let expanded = expand_impacted_lines(&strings(&["All", "RETAIL"]));
        assert_eq!(expanded.len(), LINE_OF_BUSINESS_CHOICES.len() - 1);
        assert!(!expanded.iter().any(|l| l == ALL_LINES));
    }

    #[test]
    fn test_unknown_lines() {
        assert!(unknown_lines(&strings(&["All", "RETAIL"])).is_empty());
        assert_eq!(unknown_lines(&strings(&["RETAIL", "bogus", "All "])), strings(&["bogus", "All "]));
    }

    #[test]
    fn test_expand_drops_unknown_and_duplicates() {
        let expanded = expand_impacted_lines(&strings(&["RETAIL", "bogus", "RETAIL"]));
        assert_eq!(expanded, strings(&["RETAIL"]));
    }

    #[test]
    fn test_tree_selected_flags() {
        let nodes = tree(&strings(&["TECHNOLOGY"]), &strings(&["CYBER"]), &strings(&["PHISHING"]));
        let tech = nodes.iter().find(|n| n.key == "TECHNOLOGY").unwrap();
        assert!(tech.selected);
        let cyber = tech.children.iter().find(|n| n.key == "CYBER").unwrap();
        assert!(cyber.selected);
        assert!(cyber.children.iter().any(|n| n.key == "PHISHING" && n.selected));
        assert!(nodes.iter().filter(|n| n.key != "TECHNOLOGY").all(|n| !n.selected));
    }

    #[test]
    fn test_labels_fall_back_to_key() {
        let shown = labels(&strings(&["CYBER", "ZZZ"]), lv2_label);
        assert_eq!(shown, strings(&["Cyber Security", "ZZZ"]));
    }
}
