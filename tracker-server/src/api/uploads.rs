//! Staged files of one upload batch

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use tracker_common::tokens::BatchId;

use super::auth::AdminUser;
use crate::error::{ApiError, ApiResult};
use crate::staging::{StagedFiles, StagingArea};
use crate::AppState;

/// GET /api/uploads/:batch
pub async fn get_batch(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(batch): Path<String>,
) -> ApiResult<Json<StagedFiles>> {
    let batch: BatchId = batch.parse().map_err(ApiError::BadRequest)?;
    let staging = StagingArea::new(&state.db, state.storage.as_ref(), state.uploads.as_ref());
    Ok(Json(staging.get_staged(&batch).await?))
}

pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/api/uploads/:batch", get(get_batch))
}
