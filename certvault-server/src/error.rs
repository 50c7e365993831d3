//! Server error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use certvault_core::PkiError;

use crate::store::StoreError;

/// Server error types mapped to HTTP status codes.
#[derive(Debug)]
pub enum ServerError {
    /// No usable client certificate.
    Auth(String),
    /// Authenticated, but the identity is not a registered user.
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    BadRequest(String),
    Store(StoreError),
    Internal(String),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth(e) => write!(f, "Auth error: {}", e),
            Self::Forbidden(e) => write!(f, "Forbidden: {}", e),
            Self::NotFound(e) => write!(f, "Not found: {}", e),
            Self::Conflict(e) => write!(f, "Conflict: {}", e),
            Self::BadRequest(e) => write!(f, "Bad request: {}", e),
            Self::Store(e) => write!(f, "Store error: {}", e),
            Self::Internal(e) => write!(f, "Internal error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::Auth(e) => (StatusCode::UNAUTHORIZED, e.clone()),
            Self::Forbidden(e) => (StatusCode::FORBIDDEN, e.clone()),
            Self::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            Self::Conflict(e) => (StatusCode::CONFLICT, e.clone()),
            Self::BadRequest(e) => (StatusCode::BAD_REQUEST, e.clone()),
            Self::Store(_) | Self::Internal(_) => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(login) => Self::Conflict(format!("user {} already exists", login)),
            other => Self::Store(other),
        }
    }
}

impl From<PkiError> for ServerError {
    fn from(e: PkiError) -> Self {
        match e {
            PkiError::InvalidLogin(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}
