//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use topup::TopupError;
use topup_store::StoreError;

use crate::auth::AuthError;

/// Body sent for every 500; the detail only goes to the log.
const INTERNAL_MESSAGE: &str = "Internal server error";

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad or rejected request from the client.
    BadRequest(String),
    /// Missing or invalid credentials.
    Unauthorized(String),
    /// Authenticated caller lacks the required role.
    Forbidden(String),
    /// Internal server error; the detail is logged, never returned.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_MESSAGE.to_string())
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

/// Client-caused failures, including every rejected notification, are 400s
/// so the gateway's retry policy governs redelivery. Gateway and storage
/// failures are 500s.
impl From<TopupError> for ApiError {
    fn from(err: TopupError) -> Self {
        match &err {
            TopupError::Validation(_)
            | TopupError::NotFound(_)
            | TopupError::InvalidSignature
            | TopupError::InvalidAmount(_)
            | TopupError::AmountMismatch { .. }
            | TopupError::Store(StoreError::InsufficientSupplierBalance { .. }) => {
                ApiError::BadRequest(err.to_string())
            }
            TopupError::Gateway(_) | TopupError::Store(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Unauthorized(err.to_string())
    }
}
