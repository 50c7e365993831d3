//! Sync handler.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use certvault_core::{SyncRequest, SyncResponse};

use super::{ensure_registered, json_body};
use crate::auth::Owner;
use crate::error::ServerError;
use crate::server::AppState;

/// Apply the client's secrets and return everything it is missing.
pub async fn sync(
    State(state): State<AppState>,
    owner: Owner,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, ServerError> {
    let req = json_body(payload)?;
    ensure_registered(&state, &owner)?;

    if let Some(bad) = req.secrets.iter().find(|s| s.id.is_empty()) {
        return Err(ServerError::BadRequest(format!(
            "secret with version {} has an empty id",
            bad.version
        )));
    }

    let outcome = state
        .engine
        .sync(owner.as_str(), req.secrets, &req.versions)?;

    Ok(Json(SyncResponse {
        version: outcome.server_version,
        secrets: outcome.newer,
        updated: outcome.updated,
        skipped: outcome.skipped,
    }))
}
