//! Direct reads and deletes of one owner's stored secrets.

use axum::extract::{Path, State};
use axum::Json;
use certvault_core::Secret;
use serde::Serialize;

use super::ensure_registered;
use crate::auth::Owner;
use crate::error::ServerError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: Vec<String>,
}

/// Every live secret the caller owns.
pub async fn list(
    State(state): State<AppState>,
    owner: Owner,
) -> Result<Json<Vec<Secret>>, ServerError> {
    ensure_registered(&state, &owner)?;
    Ok(Json(state.engine.list(owner.as_str())?))
}

pub async fn get(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<Secret>, ServerError> {
    ensure_registered(&state, &owner)?;
    state
        .engine
        .get(owner.as_str(), &id)?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("secret {} not found", id)))
}

/// Tombstone one secret; clients pick the delete up on their next sync.
pub async fn delete(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, ServerError> {
    ensure_registered(&state, &owner)?;
    let deleted = state
        .engine
        .delete(owner.as_str(), &[id.clone()], chrono::Utc::now().timestamp())?;
    if deleted.is_empty() {
        return Err(ServerError::NotFound(format!("secret {} not found", id)));
    }
    tracing::info!(owner = owner.as_str(), id = %id, "Deleted secret");
    Ok(Json(DeleteResponse { deleted }))
}
