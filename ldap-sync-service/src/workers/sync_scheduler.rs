use service_core::retry::{retry_with_backoff, RetryConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::SyncError;
use crate::services::bulk_sync::{BulkSyncEngine, SyncReport};

/// `tokio::time::interval` rejects a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically runs bulk sync passes until cancelled.
pub struct SyncScheduler {
    engine: Arc<BulkSyncEngine>,
    interval: Duration,
    retry: RetryConfig,
    shutdown_token: CancellationToken,
}

impl SyncScheduler {
    pub fn new(
        engine: Arc<BulkSyncEngine>,
        interval: Duration,
        retry: RetryConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            engine,
            interval,
            retry,
            shutdown_token,
        }
    }

    /// Run a pass now, then one per interval. Returns when the token is cancelled.
    pub async fn start(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting bulk sync scheduler"
        );

        let mut ticker = interval(self.interval.max(MIN_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Bulk sync scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) => tracing::info!(
                            created = report.created.len(),
                            deleted = report.deleted.len(),
                            "Bulk sync pass converged"
                        ),
                        Err(SyncError::Cancelled) => {
                            tracing::info!("Bulk sync pass cancelled");
                            break;
                        }
                        Err(e) => tracing::warn!(
                            error = %e,
                            "Bulk sync pass did not converge, retrying next interval"
                        ),
                    }
                }
            }
        }
    }

    /// One pass, retried with backoff while it fails or leaves items behind.
    /// Cancellation aborts the in-flight pass.
    pub async fn run_once(&self) -> Result<SyncReport, SyncError> {
        let pass = retry_with_backoff(&self.retry, "bulk_sync", || async {
            self.engine.run().await?.into_result()
        });

        tokio::select! {
            biased;
            _ = self.shutdown_token.cancelled() => Err(SyncError::Cancelled),
            result = pass => result,
        }
    }
}
