//! Events: list, detail with bundles, create, update, archive

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracker_common::db::{Event, Theme};
use tracker_common::taxonomy::{self, TaxonomyNode};

use super::auth::{AdminUser, CurrentUser};
use super::themes::ToggleResponse;
use crate::bundles::{build_bundles, filter_by_type, Bundle, BundleOrder, DisplayType};
use crate::db::events::{self, EventQuery, EventSort};
use crate::db::{sources, themes};
use crate::error::{ApiError, ApiResult};
use crate::forms::{validate_event, EventForm};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EventListParams {
    pub sort: Option<String>,
    pub q: Option<String>,
    pub theme_id: Option<i64>,
    pub include_archived: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EventDetailParams {
    /// ALL, LINK, FILE or MIXED
    pub source_type: Option<String>,
    pub include_archived: bool,
}

#[derive(Debug, Serialize)]
pub struct EventLabels {
    pub risk_taxonomy_lv1: Vec<String>,
    pub risk_taxonomy_lv2: Vec<String>,
    pub risk_taxonomy_lv3: Vec<String>,
    pub impacted_lines: Vec<String>,
}

impl EventLabels {
    fn of(event: &Event) -> Self {
        Self {
            risk_taxonomy_lv1: taxonomy::labels(&event.risk_taxonomy_lv1, taxonomy::lv1_label),
            risk_taxonomy_lv2: taxonomy::labels(&event.risk_taxonomy_lv2, taxonomy::lv2_label),
            risk_taxonomy_lv3: taxonomy::labels(&event.risk_taxonomy_lv3, taxonomy::lv3_label),
            impacted_lines: taxonomy::labels(&event.impacted_lines, taxonomy::line_label),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventDetail {
    pub event: Event,
    pub theme: Option<Theme>,
    pub labels: EventLabels,
    pub taxonomy: Vec<TaxonomyNode>,
    pub bundles: Vec<Bundle>,
}

pub(crate) fn parse_display_type(raw: Option<&str>) -> ApiResult<Option<DisplayType>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) if s.eq_ignore_ascii_case("ALL") => Ok(None),
        Some(s) => s.parse().map(Some).map_err(ApiError::BadRequest),
    }
}

pub(crate) async fn require_event(state: &AppState, id: i64) -> ApiResult<Event> {
    events::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Event {} not found", id)))
}

/// Validate against the owning theme; an unknown theme is a field error
async fn validated_input(state: &AppState, form: &EventForm) -> ApiResult<events::EventInput> {
    let theme = match form.theme_id {
        Some(theme_id) => themes::get(&state.db, theme_id).await?,
        None => None,
    };
    let mut input = validate_event(form, theme.as_ref().map(|t| t.risk_rating));
    if form.theme_id.is_some() && theme.is_none() {
        let mut errors = input.err().unwrap_or_default();
        errors.add("theme_id", "Select a valid choice. That choice is not one of the available choices.");
        input = Err(errors);
    }
    input.map_err(ApiError::validation)
}

/// GET /api/events
pub async fn list_events(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Query(params): Query<EventListParams>,
) -> ApiResult<Json<Vec<Event>>> {
    let sort = match params.sort.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<EventSort>()?,
        None => EventSort::default(),
    };
    let query = EventQuery {
        theme_id: params.theme_id,
        include_archived: params.include_archived,
        q: params.q,
        sort,
    };
    Ok(Json(events::list(&state.db, &query).await?))
}

/// POST /api/events
pub async fn create_event(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Json(form): Json<EventForm>,
) -> ApiResult<(StatusCode, Json<Event>)> {
    let input = validated_input(&state, &form).await?;
    let id = events::insert(&state.db, &input, Some(user.id)).await?;
    info!(event_id = id, theme_id = input.theme_id, user_id = user.id, "Event created");
    Ok((StatusCode::CREATED, Json(require_event(&state, id).await?)))
}

/// GET /api/events/:id
///
/// Bundles are in detail order (newest source date first).
pub async fn get_event(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Path(id): Path<i64>,
    Query(params): Query<EventDetailParams>,
) -> ApiResult<Json<EventDetail>> {
    let display_type = parse_display_type(params.source_type.as_deref())?;
    let event = require_event(&state, id).await?;
    let theme = themes::get(&state.db, event.theme_id).await?;

    let rows = sources::list_for_event(&state.db, id, params.include_archived).await?;
    let bundles = filter_by_type(build_bundles(rows, BundleOrder::DateDesc), display_type);

    Ok(Json(EventDetail {
        labels: EventLabels::of(&event),
        taxonomy: taxonomy::tree(
            &event.risk_taxonomy_lv1,
            &event.risk_taxonomy_lv2,
            &event.risk_taxonomy_lv3,
        ),
        event,
        theme,
        bundles,
    }))
}

/// PUT /api/events/:id
pub async fn update_event(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Path(id): Path<i64>,
    Json(form): Json<EventForm>,
) -> ApiResult<Json<Event>> {
    require_event(&state, id).await?;
    let input = validated_input(&state, &form).await?;
    events::update(&state.db, id, &input).await?;
    info!(event_id = id, user_id = user.id, "Event updated");
    Ok(Json(require_event(&state, id).await?))
}

/// POST /api/events/:id/toggle
pub async fn toggle_event(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ToggleResponse>> {
    let is_active = events::toggle_active(&state.db, id).await?;
    info!(event_id = id, user_id = user.id, is_active, "Event toggled");
    Ok(Json(ToggleResponse { id, is_active }))
}

/// GET /api/events/:id/summaries
pub async fn list_summaries(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<String>>> {
    require_event(&state, id).await?;
    Ok(Json(sources::existing_summaries(&state.db, id).await?))
}

pub fn event_routes() -> Router<AppState> {
    Router::new()
        .route("/api/events", get(list_events).post(create_event))
        .route("/api/events/:id", get(get_event).put(update_event))
        .route("/api/events/:id/toggle", post(toggle_event))
        .route("/api/events/:id/summaries", get(list_summaries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_display_type() {
        assert_eq!(parse_display_type(None).unwrap(), None);
        assert_eq!(parse_display_type(Some("all")).unwrap(), None);
        assert_eq!(parse_display_type(Some("mixed")).unwrap(), Some(DisplayType::Mixed));
        assert!(parse_display_type(Some("video")).is_err());
    }
}
