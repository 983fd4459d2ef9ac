//! Error types for sacha-advisor HTTP handlers

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::ProcessingError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Document pipeline failure; carries its own status code
    #[error(transparent)]
    Processing(#[from] ProcessingError),

    /// sacha-common error
    #[error("Common error: {0}")]
    Common(#[from] sacha_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Processing(ref err) => (err.status_code(), err.code(), err.user_message()),
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
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
