//! Enrollment and login handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use certvault_core::sync::models::{LoginResponse, RegisterRequest, RegisterResponse};

use super::{ensure_registered, json_body};
use crate::auth::Owner;
use crate::error::ServerError;
use crate::server::AppState;

/// Enroll a new login and hand back its certificate and private key.
///
/// Reached without a client certificate. The key is generated here, sent
/// once, and not kept.
pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Json<RegisterResponse>, ServerError> {
    let req = json_body(payload)?;
    if req.login.is_empty() {
        return Err(ServerError::BadRequest("login must not be empty".to_string()));
    }

    if state.storage.user_exists(&req.login)? {
        return Err(ServerError::Conflict(format!(
            "user {} already exists",
            req.login
        )));
    }

    let credential = state.authority.issue_leaf(&req.login)?;
    // a concurrent enrollment of the same login loses here with 409
    state.storage.register_user(&req.login)?;

    tracing::info!(login = %req.login, "Registered user");
    Ok(Json(RegisterResponse {
        cert: credential.cert_pem,
        key: credential.key_pem.as_str().to_owned(),
    }))
}

/// Confirm the presented certificate belongs to a registered user.
pub async fn login(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<Json<LoginResponse>, ServerError> {
    ensure_registered(&state, &owner)?;
    tracing::debug!(owner = owner.as_str(), "Login");
    Ok(Json(LoginResponse {
        status: "ok".to_string(),
        user: owner.0,
    }))
}
