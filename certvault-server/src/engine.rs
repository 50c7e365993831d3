//! Sync reconciliation: apply a client's writes, then hand back what the
//! client is missing.

use std::collections::HashMap;
use std::sync::Arc;

use certvault_core::{ConflictResolver, Secret};

use crate::store::{Result, SecretStore, UpsertOutcome};

/// Result of one reconciliation round.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub server_version: i64,
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
    pub newer: Vec<Secret>,
}

#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<dyn SecretStore>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Reconcile `incoming` against the owner's stored secrets.
    ///
    /// Tombstones are written first, through the same conditional path as
    /// live writes, so a delete records its own version and a later live
    /// write can still resurrect the secret.
    pub fn sync(
        &self,
        owner: &str,
        incoming: Vec<Secret>,
        known: &HashMap<String, i64>,
    ) -> Result<SyncOutcome> {
        let (tombstones, live): (Vec<Secret>, Vec<Secret>) =
            incoming.into_iter().partition(|s| s.deleted);

        let mut applied = UpsertOutcome::default();
        if !tombstones.is_empty() {
            applied.extend(self.store.upsert_if_newer(owner, &tombstones)?);
        }
        if !live.is_empty() {
            applied.extend(self.store.upsert_if_newer(owner, &live)?);
        }

        let newer = self.store.newer_than(owner, known)?;
        let server_version = self.store.max_version(owner)?;

        tracing::debug!(
            owner,
            tombstones = tombstones.len(),
            updated = applied.updated.len(),
            skipped = applied.skipped.len(),
            returned = newer.len(),
            server_version,
            "Sync reconciled"
        );

        Ok(SyncOutcome {
            server_version,
            updated: applied.updated,
            skipped: applied.skipped,
            newer,
        })
    }

    /// Tombstone live secrets as of `now`.
    ///
    /// Each tombstone gets `max(now, version + 1)` and is written through the
    /// conditional path, so clients holding the old version receive it on
    /// their next sync. Unknown or already deleted ids are ignored. Returns
    /// the ids that were deleted.
    pub fn delete(&self, owner: &str, ids: &[String], now: i64) -> Result<Vec<String>> {
        let mut tombstones = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(live) = self.store.by_id(owner, id)? {
                tombstones.push(Secret {
                    version: ConflictResolver::next_version(live.version, now),
                    deleted: true,
                    ..live
                });
            }
        }
        if tombstones.is_empty() {
            return Ok(Vec::new());
        }

        let outcome = self.store.upsert_if_newer(owner, &tombstones)?;
        tracing::debug!(owner, deleted = outcome.updated.len(), "Deleted secrets");
        Ok(outcome.updated)
    }

    /// A live secret by id.
    pub fn get(&self, owner: &str, id: &str) -> Result<Option<Secret>> {
        self.store.by_id(owner, id)
    }

    /// Every live secret of the owner.
    pub fn list(&self, owner: &str) -> Result<Vec<Secret>> {
        self.store.all_live(owner)
    }
}
