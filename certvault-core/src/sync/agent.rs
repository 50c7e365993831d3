//! Periodic reconciliation of the local cache with the server.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{LocalCache, MergeOutcome};
use crate::sync::client::SyncClient;
use crate::sync::Result;

pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(10);

/// Summary of one sync round trip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub server_version: i64,
    pub sent: usize,
    pub updated: usize,
    pub skipped: usize,
    pub merge: MergeOutcome,
}

/// Pushes the cache to the server and folds the response back in.
#[derive(Debug, Clone)]
pub struct AutoSync {
    client: Arc<SyncClient>,
    cache: Arc<LocalCache>,
}

impl AutoSync {
    pub fn new(client: Arc<SyncClient>, cache: Arc<LocalCache>) -> Self {
        Self { client, cache }
    }

    /// One full round: snapshot the pending changes, send, settle what the
    /// server answered for, merge what it returned.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let request = self.cache.snapshot()?;
        let sent = request.secrets.len();

        let response = self.client.sync(&request).await?;
        if !response.skipped.is_empty() {
            debug!(skipped = ?response.skipped, "Server kept newer copies");
        }

        let settled = self
            .cache
            .acknowledge(&request.secrets, &response.updated, &response.skipped)?;
        let merge = self
            .cache
            .merge_remote(response.secrets, response.version)?;
        debug!(settled, "Server acknowledged local changes");

        Ok(SyncReport {
            server_version: response.version,
            sent,
            updated: response.updated.len(),
            skipped: response.skipped.len(),
            merge,
        })
    }

    /// Run [`sync_once`](Self::sync_once) every `period` until `cancel`
    /// fires. A failed round is logged and retried on the next tick.
    pub fn spawn(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let agent = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), "Auto-sync started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Auto-sync shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        match agent.sync_once().await {
                            Ok(report) => debug!(
                                version = report.server_version,
                                sent = report.sent,
                                received = report.merge.replaced
                                    + report.merge.appended
                                    + report.merge.removed,
                                "Auto-sync round complete"
                            ),
                            Err(e) => warn!(error = %e, "Auto-sync failed, retrying next tick"),
                        }
                    }
                }
            }
        })
    }
}
