//! `/f/<token>/` routes for the download gateway

use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Router,
};

use super::auth::{ClientMeta, MaybeUser};
use crate::error::ApiResult;
use crate::gateway::{self, Requester};
use crate::AppState;

/// GET /f/:token/
pub async fn download(
    State(state): State<AppState>,
    MaybeUser(user): MaybeUser,
    client: ClientMeta,
    Path(token): Path<String>,
) -> ApiResult<Response> {
    let requester = Requester {
        user: user.as_ref(),
        ip: client.ip.as_deref(),
        user_agent: &client.user_agent,
    };
    gateway::download(&state, &token, requester).await
}

pub fn download_routes() -> Router<AppState> {
    Router::new()
        .route("/f/:token/", get(download))
        .route("/f/:token", get(download))
}
