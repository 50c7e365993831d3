//! Background cleanup: purge tombstones older than the retention window.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::store::{Result, SecretStore};

pub struct Janitor {
    store: Arc<dyn SecretStore>,
    retention: Duration,
}

impl Janitor {
    pub fn new(store: Arc<dyn SecretStore>, retention: Duration) -> Self {
        Self { store, retention }
    }

    /// Purge tombstones whose version is older than `now - retention`.
    pub fn run_once(&self, now: i64) -> Result<usize> {
        let retention = i64::try_from(self.retention.as_secs()).unwrap_or(i64::MAX);
        let cutoff = now.saturating_sub(retention);
        let purged = self.store.purge_tombstones(cutoff)?;
        if purged > 0 {
            tracing::info!(purged, cutoff, "Purged expired tombstones");
        } else {
            tracing::debug!(cutoff, "No expired tombstones");
        }
        Ok(purged)
    }

    /// Run a pass every `period` until `cancel` fires. A failed pass is
    /// logged and the loop carries on.
    pub fn spawn(self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            tracing::info!(
                interval_secs = period.as_secs(),
                retention_secs = self.retention.as_secs(),
                "Tombstone janitor started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Tombstone janitor shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(e) = self.run_once(chrono::Utc::now().timestamp()) {
                            tracing::error!("Cleanup error: {}", e);
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ServerStorage;
    use crate::store::{StoreError, UpsertOutcome};
    use certvault_core::{Secret, SecretKind};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const DAY: i64 = 86_400;

    fn secret(id: &str, version: i64, deleted: bool) -> Secret {
        Secret {
            id: id.to_string(),
            kind: SecretKind::Binary,
            payload: vec![0; 4],
            comment: String::new(),
            version,
            deleted,
        }
    }

    fn seeded(now: i64) -> ServerStorage {
        let storage = ServerStorage::in_memory().unwrap();
        storage.register_user("alice").unwrap();
        storage
            .upsert_if_newer(
                "alice",
                &[
                    secret("ancient", now - 31 * DAY, true),
                    secret("recent", now - 29 * DAY, true),
                    secret("old-but-live", now - 400 * DAY, false),
                ],
            )
            .unwrap();
        storage
    }

    #[test]
    fn purges_only_tombstones_past_retention() {
        let now = 1_750_000_000;
        let storage = seeded(now);
        let janitor = Janitor::new(
            Arc::new(storage.clone()),
            Duration::from_secs(30 * DAY as u64),
        );

        assert_eq!(janitor.run_once(now).unwrap(), 1);
        let ids: Vec<_> = storage
            .newer_than("alice", &HashMap::new())
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["old-but-live", "recent"]);

        // second pass has nothing left to do
        assert_eq!(janitor.run_once(now).unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_janitor_runs_and_stops() {
        let now = chrono::Utc::now().timestamp();
        let storage = seeded(now);
        let cancel = CancellationToken::new();
        let handle = Janitor::new(
            Arc::new(storage.clone()),
            Duration::from_secs(30 * DAY as u64),
        )
        .spawn(Duration::from_millis(10), cancel.clone());

        // first tick fires immediately
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(storage.newer_than("alice", &HashMap::new()).unwrap().len(), 2);
    }

    /// Store whose first purge fails.
    #[derive(Default)]
    struct FlakyStore {
        purges: AtomicUsize,
    }

    impl SecretStore for FlakyStore {
        fn max_version(&self, _owner: &str) -> Result<i64> {
            Ok(0)
        }

        fn all_live(&self, _owner: &str) -> Result<Vec<Secret>> {
            Ok(Vec::new())
        }

        fn by_id(&self, _owner: &str, _id: &str) -> Result<Option<Secret>> {
            Ok(None)
        }

        fn newer_than(&self, _owner: &str, _known: &HashMap<String, i64>) -> Result<Vec<Secret>> {
            Ok(Vec::new())
        }

        fn upsert_if_newer(&self, _owner: &str, _secrets: &[Secret]) -> Result<UpsertOutcome> {
            Ok(UpsertOutcome::default())
        }

        fn purge_tombstones(&self, _cutoff: i64) -> Result<usize> {
            if self.purges.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(StoreError::LockPoisoned);
            }
            Ok(0)
        }
    }

    #[test]
    fn failed_pass_reports_error() {
        let store = Arc::new(FlakyStore::default());
        let janitor = Janitor::new(store.clone(), Duration::from_secs(60));
        assert!(matches!(janitor.run_once(1_000), Err(StoreError::LockPoisoned)));
        assert_eq!(janitor.run_once(1_000).unwrap(), 0);
    }

    #[tokio::test]
    async fn spawned_janitor_survives_failed_pass() {
        let store = Arc::new(FlakyStore::default());
        let cancel = CancellationToken::new();
        let handle = Janitor::new(store.clone(), Duration::from_secs(60))
            .spawn(Duration::from_millis(10), cancel.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while store.purges.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();

        assert!(store.purges.load(Ordering::SeqCst) >= 3);
    }
}
