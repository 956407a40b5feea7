//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use order_store::{ErrorKind, StoreError};
use retry::RetryError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<RetryError<StoreError>> for ApiError {
    fn from(err: RetryError<StoreError>) -> Self {
        match err.cause() {
            Some(cause) if cause.kind() == ErrorKind::NotFound => {
                ApiError::NotFound(cause.to_string())
            }
            Some(_) => ApiError::Internal(err.to_string()),
            None => ApiError::Internal("request deadline exceeded".to_string()),
        }
    }
}
