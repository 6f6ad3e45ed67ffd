//! Themes and categories

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracker_common::db::{Category, Theme};

use super::auth::{AdminUser, CurrentUser, SuperUser};
use crate::db::themes::{self, ThemeQuery};
use crate::error::{ApiError, ApiResult, FormErrors};
use crate::forms::{validate_theme, ThemeForm};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ThemeListParams {
    pub include_archived: bool,
    pub q: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub id: i64,
    pub is_active: bool,
}

/// GET /api/categories
pub async fn list_categories(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> ApiResult<Json<Vec<Category>>> {
    Ok(Json(themes::list_categories(&state.db).await?))
}

/// GET /api/themes
pub async fn list_themes(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Query(params): Query<ThemeListParams>,
) -> ApiResult<Json<Vec<Theme>>> {
    let query = ThemeQuery {
        include_archived: params.include_archived,
        q: params.q,
    };
    Ok(Json(themes::list(&state.db, &query).await?))
}

/// POST /api/themes
pub async fn create_theme(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Json(form): Json<ThemeForm>,
) -> ApiResult<(StatusCode, Json<Theme>)> {
    let new_theme = validate_theme(&form).map_err(ApiError::validation)?;

    let categories = themes::list_categories(&state.db).await?;
    if !categories.iter().any(|c| c.id == new_theme.category_id) {
        let mut errors = FormErrors::new();
        errors.add("category_id", "Select a valid choice. That choice is not one of the available choices.");
        return Err(ApiError::validation(errors));
    }

    let id = themes::insert(&state.db, &new_theme, Some(user.id)).await?;
    info!(theme_id = id, user_id = user.id, "Theme created");
    let theme = themes::get(&state.db, id)
        .await?
        .ok_or_else(|| ApiError::Internal(format!("Theme {} vanished after insert", id)))?;
    Ok((StatusCode::CREATED, Json(theme)))
}

/// POST /api/themes/:id/toggle
pub async fn toggle_theme(
    State(state): State<AppState>,
    AdminUser(user): AdminUser,
    Path(id): Path<i64>,
) -> ApiResult<Json<ToggleResponse>> {
    let is_active = themes::toggle_active(&state.db, id).await?;
    info!(theme_id = id, user_id = user.id, is_active, "Theme toggled");
    Ok(Json(ToggleResponse { id, is_active }))
}

/// DELETE /api/themes/:id
///
/// Refused with 409 while the theme owns any event.
pub async fn delete_theme(
    State(state): State<AppState>,
    SuperUser(user): SuperUser,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    themes::delete(&state.db, id).await?;
    info!(theme_id = id, user_id = user.id, "Theme deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub fn theme_routes() -> Router<AppState> {
    Router::new()
        .route("/api/categories", get(list_categories))
        .route("/api/themes", get(list_themes).post(create_theme))
        .route("/api/themes/:id", axum::routing::delete(delete_theme))
        .route("/api/themes/:id/toggle", post(toggle_theme))
}
