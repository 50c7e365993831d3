//! Authoritative secret store interface.

use std::collections::HashMap;

use certvault_core::Secret;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("User already exists: {0}")]
    Conflict(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Ids written and ids ignored by a conditional upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

impl UpsertOutcome {
    pub fn extend(&mut self, other: UpsertOutcome) {
        self.updated.extend(other.updated);
        self.skipped.extend(other.skipped);
    }
}

/// Per-owner versioned secret storage.
///
/// Every operation is scoped to `owner`; nothing crosses owners except the
/// tombstone purge, which is global. Deletes are written as tombstones
/// through [`upsert_if_newer`](Self::upsert_if_newer) so they carry a
/// version other clients can compare against.
pub trait SecretStore: Send + Sync {
    /// Highest version over all the owner's secrets, tombstones included.
    /// `0` when the owner has none.
    fn max_version(&self, owner: &str) -> Result<i64>;

    /// Every live secret of the owner.
    fn all_live(&self, owner: &str) -> Result<Vec<Secret>>;

    /// A live secret; tombstones read as absent.
    fn by_id(&self, owner: &str, id: &str) -> Result<Option<Secret>>;

    /// Secrets, tombstones included, that `known` does not list or lists
    /// at a lower version.
    fn newer_than(&self, owner: &str, known: &HashMap<String, i64>) -> Result<Vec<Secret>>;

    /// Write each secret only when no stored copy exists or the stored
    /// version is strictly lower. Each secret commits on its own; an error
    /// stops the batch but keeps what already committed.
    fn upsert_if_newer(&self, owner: &str, secrets: &[Secret]) -> Result<UpsertOutcome>;

    /// Drop tombstones whose version is below `cutoff`. Returns the count.
    fn purge_tombstones(&self, cutoff: i64) -> Result<usize>;
}
