//! Callback-timeout sweep.
//!
//! Jobs parked in `awaiting_callback` depend on the vendor actually calling
//! back; this periodic pass fails the ones whose callback never arrived
//! within the configured window. It competes with the webhook reconciler
//! through the store's conditional update, so a callback landing mid-sweep
//! is never clobbered: whichever side settles the job first wins.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fetchgate_core::JobStatus;

use crate::store::{JobStore, JobUpdate, StoreError};

/// Handle to a running sweep loop.
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl SweeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Fails `awaiting_callback` jobs whose callback window elapsed.
pub struct Sweeper {
    store: Arc<dyn JobStore>,
    callback_timeout: Duration,
}

impl Sweeper {
    pub fn new(store: Arc<dyn JobStore>, callback_timeout: Duration) -> Self {
        Self {
            store,
            callback_timeout,
        }
    }

    /// One sweep pass. Returns how many jobs were failed.
    pub async fn sweep_once(&self) -> Result<usize, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.callback_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let stale = self.store.awaiting_callback_older_than(cutoff).await?;
        let mut failed = 0usize;

        for id in stale {
            let update = JobUpdate::failed(format!(
                "vendor callback not received within {}s",
                self.callback_timeout.as_secs()
            ));
            match self
                .store
                .update_if(id, JobStatus::AwaitingCallback, update)
                .await
            {
                Ok(_) => {
                    warn!(job_id = %id, "callback timed out, job failed");
                    failed += 1;
                }
                // The callback landed between the scan and this update.
                Err(StoreError::Conflict { .. }) => {
                    debug!(job_id = %id, "job settled before the sweep, skipping");
                }
                Err(StoreError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(failed)
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "callback sweep started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            error!(error = %e, "sweep pass failed");
                        }
                    }
                }
            }
            info!("callback sweep stopped");
        });

        SweeperHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use fetchgate_core::VendorKind;

    use super::*;
    use crate::store::InMemoryJobStore;

    async fn park_awaiting(store: &InMemoryJobStore) -> fetchgate_core::JobId {
        let job = store.create(json!({}), VendorKind::Async).await.unwrap();
        store
            .update_if(job.id, JobStatus::Pending, JobUpdate::status(JobStatus::Processing))
            .await
            .unwrap();
        store
            .update_if(
                job.id,
                JobStatus::Processing,
                JobUpdate::status(JobStatus::AwaitingCallback),
            )
            .await
            .unwrap();
        job.id
    }

    #[tokio::test]
    async fn stale_awaiting_job_is_failed() {
        let store = InMemoryJobStore::arc();
        let id = park_awaiting(&store).await;

        // Zero timeout: the job is immediately past its window.
        let sweeper = Sweeper::new(store.clone(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let failed = sweeper.sweep_once().await.unwrap();
        assert_eq!(failed, 1);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().contains("callback not received"));
    }

    #[tokio::test]
    async fn fresh_awaiting_job_is_left_alone() {
        let store = InMemoryJobStore::arc();
        let id = park_awaiting(&store).await;

        let sweeper = Sweeper::new(store.clone(), Duration::from_secs(3600));
        let failed = sweeper.sweep_once().await.unwrap();
        assert_eq!(failed, 0);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::AwaitingCallback);
    }

    #[tokio::test]
    async fn settled_job_between_scan_and_update_is_skipped() {
        let store = InMemoryJobStore::arc();
        let id = park_awaiting(&store).await;

        // The callback wins the race before the sweep updates.
        store
            .update_if(
                id,
                JobStatus::AwaitingCallback,
                JobUpdate::complete(json!({"late": false})),
            )
            .await
            .unwrap();

        let sweeper = Sweeper::new(store.clone(), Duration::ZERO);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let failed = sweeper.sweep_once().await.unwrap();
        assert_eq!(failed, 0);

        let job = store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Complete);
    }

    #[tokio::test]
    async fn spawned_loop_sweeps_and_shuts_down() {
        let store = InMemoryJobStore::arc();
        let id = park_awaiting(&store).await;

        let handle =
            Sweeper::new(store.clone(), Duration::ZERO).spawn(Duration::from_millis(10));

        for _ in 0..100 {
            if store.get(id).await.unwrap().unwrap().status == JobStatus::Failed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        handle.shutdown().await;

        assert_eq!(
            store.get(id).await.unwrap().unwrap().status,
            JobStatus::Failed
        );
    }
}
