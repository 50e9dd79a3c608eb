//! Error types for quorum-pub
//!
//! `PublishError` is the taxonomy of a publication run; `ApiError` maps it
//! (and everything else a handler can hit) onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::services::CorpusError;

/// Publication run error
#[derive(Debug, Error)]
pub enum PublishError {
    /// Fatal: detected before the task loop, aborts the whole run
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The structure of an annotation value does not match the campaign mode
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Another run currently holds the publication lock of this campaign
    #[error("A publication is already running for campaign {0}")]
    RunInProgress(Uuid),

    /// Corpus API call failed
    #[error("Corpus API error: {0}")]
    Corpus(#[from] CorpusError),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database operation error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored JSON could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// quorum-common error
    #[error(transparent)]
    Common(#[from] quorum_common::Error),
}

/// Result type of publication operations
pub type PublishResult<T> = Result<T, PublishError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., publication already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// quorum-common error
    #[error("Common error: {0}")]
    Common(#[from] quorum_common::Error),
}

impl From<PublishError> for ApiError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Configuration(_) | PublishError::InvalidPayload(_) => {
                ApiError::BadRequest(err.to_string())
            }
            PublishError::RunInProgress(_) => ApiError::Conflict(err.to_string()),
            PublishError::NotFound(msg) => ApiError::NotFound(msg),
            PublishError::Common(inner) => ApiError::Common(inner),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => match err {
                quorum_common::Error::NotFound(msg) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
                }
                quorum_common::Error::InvalidInput(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                other => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "COMMON_ERROR",
                    other.to_string(),
                ),
            },
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
