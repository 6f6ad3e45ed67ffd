//! Taxonomy tree and dependent option lists
//!
//! Selections are passed as comma-separated keys, e.g.
//! `GET /api/taxonomy/options?level=2&parents=OPERATIONAL,COMPLIANCE`.

use axum::{extract::Query, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tracker_common::taxonomy::{self, Choice, TaxonomyNode};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TreeQuery {
    pub lv1: Option<String>,
    pub lv2: Option<String>,
    pub lv3: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChoiceItem {
    pub key: &'static str,
    pub label: &'static str,
}

impl From<&Choice> for ChoiceItem {
    fn from(choice: &Choice) -> Self {
        Self {
            key: choice.0,
            label: choice.1,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TaxonomyResponse {
    pub tree: Vec<TaxonomyNode>,
    pub impacted_lines: Vec<ChoiceItem>,
}

#[derive(Debug, Deserialize)]
pub struct OptionsQuery {
    /// 2 or 3
    pub level: u8,
    pub parents: Option<String>,
}

pub(crate) fn split_keys(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// GET /api/taxonomy
pub async fn get_tree(Query(query): Query<TreeQuery>) -> Json<TaxonomyResponse> {
    let lv1 = split_keys(query.lv1.as_deref());
    let lv2 = split_keys(query.lv2.as_deref());
    let lv3 = split_keys(query.lv3.as_deref());
    Json(TaxonomyResponse {
        tree: taxonomy::tree(&lv1, &lv2, &lv3),
        impacted_lines: taxonomy::LINE_OF_BUSINESS_CHOICES.iter().map(ChoiceItem::from).collect(),
    })
}

/// GET /api/taxonomy/options
pub async fn get_options(Query(query): Query<OptionsQuery>) -> ApiResult<Json<Vec<ChoiceItem>>> {
    let parents = split_keys(query.parents.as_deref());
    let options = match query.level {
        2 => taxonomy::valid_lv2_options(&parents),
        3 => taxonomy::valid_lv3_options(&parents),
        other => return Err(ApiError::BadRequest(format!("Unknown taxonomy level {}", other))),
    };
    Ok(Json(options.iter().map(ChoiceItem::from).collect()))
}

pub fn taxonomy_routes() -> Router<AppState> {
    Router::new()
        .route("/api/taxonomy", get(get_tree))
        .route("/api/taxonomy/options", get(get_options))
}
