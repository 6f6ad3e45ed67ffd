//! Error types for tracker-server
//!
//! Every handler returns `ApiResult<T>`. Errors render as
//! `{"error": {"code", "message"}}`; validation failures additionally carry
//! the field messages and the in-progress form state so a client can
//! re-render without losing staged files.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::storage::StorageError;

/// Field-level and form-level validation messages
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FormErrors {
    /// `field name -> messages`
    pub fields: BTreeMap<String, Vec<String>>,
    /// Messages not tied to one field
    pub non_field_errors: Vec<String>,
}

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields.entry(field.to_string()).or_default().push(message.into());
    }

    pub fn add_form(&mut self, message: impl Into<String>) {
        self.non_field_errors.push(message.into());
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.non_field_errors.is_empty()
    }

    pub fn merge(&mut self, other: FormErrors) {
        for (field, messages) in other.fields {
            self.fields.entry(field).or_default().extend(messages);
        }
        self.non_field_errors.extend(other.non_field_errors);
    }
}

/// Rejected submission plus everything needed to show it again
#[derive(Debug, Clone, Serialize)]
pub struct ValidationFailure {
    pub errors: FormErrors,
    /// Non-fatal notices, e.g. files skipped for their extension
    pub warnings: Vec<String>,
    /// Echo of the submission: staged files, typed extra links, fields
    pub state: serde_json::Value,
}

impl ValidationFailure {
    pub fn new(errors: FormErrors) -> Self {
        Self {
            errors,
            warnings: Vec::new(),
            state: serde_json::Value::Null,
        }
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// No valid session (401)
    #[error("Authentication required")]
    Unauthenticated,

    /// Authenticated but not allowed (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Conflict with stored state (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request body over the configured limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Form validation failed (422)
    #[error("Validation failed")]
    Validation(Box<ValidationFailure>),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Common(#[from] tracker_common::Error),
}

impl ApiError {
    pub fn validation(errors: FormErrors) -> Self {
        ApiError::Validation(Box::new(ValidationFailure::new(errors)))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Common(err) => match err {
                tracker_common::Error::NotFound(_) => StatusCode::NOT_FOUND,
                tracker_common::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                tracker_common::Error::Conflict(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Internal(_) | ApiError::Database(_) | ApiError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthenticated => "UNAUTHENTICATED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Validation(_) => "VALIDATION_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::Storage(_) => "STORAGE_ERROR",
            ApiError::Common(err) => match err {
                tracker_common::Error::NotFound(_) => "NOT_FOUND",
                tracker_common::Error::InvalidInput(_) => "BAD_REQUEST",
                tracker_common::Error::Conflict(_) => "CONFLICT",
                _ => "INTERNAL_ERROR",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code, "{}", self);
        }

        let body = match self {
            ApiError::Validation(failure) => json!({
                "error": {
                    "code": code,
                    "message": "Validation failed",
                    "fields": failure.errors.fields,
                    "non_field_errors": failure.errors.non_field_errors,
                },
                "warnings": failure.warnings,
                "state": failure.state,
            }),
            // Server-side details stay in the log
            other if status.is_server_error() => json!({
                "error": {
                    "code": code,
                    "message": match other {
                        ApiError::Internal(msg) => msg,
                        _ => "Internal server error".to_string(),
                    },
                }
            }),
            other => json!({
                "error": {
                    "code": code,
                    "message": other.to_string(),
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
