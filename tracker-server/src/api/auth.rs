//! Sessions, request extractors and access logs
//!
//! A session token is accepted from `Authorization: Bearer <token>` or from
//! the `tracker_session` cookie set by `POST /api/login`.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracker_common::db::{User, UserAccessLog};

use crate::db::{audit, sessions, users};
use crate::error::{ApiError, ApiResult, FormErrors};
use crate::permissions::{can_delete, can_mutate};
use crate::AppState;

pub const SESSION_COOKIE: &str = "tracker_session";

/// Rows returned by `GET /api/access-logs`
const ACCESS_LOG_LIMIT: i64 = 100;

fn session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Signed-in user, if any
pub struct MaybeUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match session_token(&parts.headers) {
            Some(token) => Ok(MaybeUser(sessions::find_user(&state.db, &token).await?)),
            None => Ok(MaybeUser(None)),
        }
    }
}

/// Any signed-in user (401 otherwise)
pub struct CurrentUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let MaybeUser(user) = MaybeUser::from_request_parts(parts, state).await?;
        user.map(CurrentUser).ok_or(ApiError::Unauthenticated)
    }
}

/// Staff or superuser; required for every mutation
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !can_mutate(&user) {
            return Err(ApiError::Forbidden("Administrator access required".to_string()));
        }
        Ok(AdminUser(user))
    }
}

/// Superuser only; hard deletes and audit views
pub struct SuperUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for SuperUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !can_delete(&user) {
            return Err(ApiError::Forbidden("Superuser access required".to_string()));
        }
        Ok(SuperUser(user))
    }
}

/// Client address and user agent for audit rows
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub ip: Option<String>,
    pub user_agent: String,
}

impl ClientMeta {
    pub fn from_parts(parts: &Parts) -> Self {
        let header_str = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        // First hop of X-Forwarded-For, then X-Real-IP, then the socket
        let ip = header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| header_str("x-real-ip").map(str::to_string))
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            });

        let user_agent = header_str(header::USER_AGENT.as_str()).unwrap_or_default().to_string();

        Self { ip, user_agent }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for ClientMeta {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientMeta::from_parts(parts))
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Username or email
    pub login: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

/// POST /api/login
pub async fn login(
    State(state): State<AppState>,
    client: ClientMeta,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Response> {
    let Some(user) = users::authenticate(&state.db, &request.login, &request.password).await? else {
        info!(login = %request.login.trim(), "Rejected login");
        let mut errors = FormErrors::new();
        errors.add_form("Please enter a correct username and password.");
        return Err(ApiError::validation(errors));
    };

    let token = sessions::create(&state.db, user.id, state.session_ttl).await?;

    if let Err(e) =
        audit::record_login(&state.db, user.id, &user.username, client.ip.as_deref(), &client.user_agent).await
    {
        warn!(user_id = user.id, "Failed to write access log: {}", e);
    }
    info!(user_id = user.id, username = %user.username, "User logged in");

    let cookie = format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        SESSION_COOKIE,
        token,
        state.session_ttl.num_seconds()
    );
    Ok(([(header::SET_COOKIE, cookie)], Json(LoginResponse { token, user })).into_response())
}

/// POST /api/logout
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Response> {
    if let Some(token) = session_token(&headers) {
        sessions::delete(&state.db, &token).await?;
    }
    let cookie = format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", SESSION_COOKIE);
    Ok((StatusCode::NO_CONTENT, [(header::SET_COOKIE, cookie)]).into_response())
}

/// GET /api/me
pub async fn me(CurrentUser(user): CurrentUser) -> Json<User> {
    Json(user)
}

/// GET /api/access-logs
pub async fn access_logs(
    State(state): State<AppState>,
    SuperUser(_): SuperUser,
) -> ApiResult<Json<Vec<UserAccessLog>>> {
    Ok(Json(audit::recent_logins(&state.db, ACCESS_LOG_LIMIT).await?))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/login", post(login))
        .route("/api/logout", post(logout))
        .route("/api/me", get(me))
        .route("/api/access-logs", get(access_logs))
}
