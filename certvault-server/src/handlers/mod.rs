//! HTTP handlers.

pub mod secrets;
pub mod sync;
pub mod users;

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::auth::Owner;
use crate::error::ServerError;
use crate::server::AppState;

/// Unwrap a JSON body, reporting malformed input as a 400 with the usual
/// error body.
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ServerError> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| ServerError::BadRequest(e.body_text()))
}

/// The certificate is valid but only registered logins own data.
pub(crate) fn ensure_registered(state: &AppState, owner: &Owner) -> Result<(), ServerError> {
    if state.storage.user_exists(owner.as_str())? {
        Ok(())
    } else {
        Err(ServerError::Forbidden(format!(
            "user {} is not registered",
            owner.as_str()
        )))
    }
}
