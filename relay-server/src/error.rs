//! Error types for the relay server

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_core::{RelayError, StoreError};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// Startup and runtime failures of the server process
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by admin handlers, rendered as `{error, message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "validation_error",
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        let (status, kind) = match &err {
            RelayError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            RelayError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        if status.is_server_error() {
            error!(error = %err, "Admin request failed");
        }
        Self {
            status,
            kind,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.kind,
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;
