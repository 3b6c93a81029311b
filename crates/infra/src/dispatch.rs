//! Dispatcher: the worker pool consuming the job queue.
//!
//! Each worker loops on dequeue and drives one job at a time through the
//! status state machine. All mutations go through the store's conditional
//! update, so any number of workers can race on redeliveries safely: the
//! claim `pending -> processing` succeeds for exactly one of them and the
//! rest acknowledge and discard.
//!
//! Retryable vendor failures below the attempt cap move the job back to
//! `pending` and leave the delivery unacknowledged; the queue's visibility
//! timeout then provides both the backoff delay and crash-safety.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use fetchgate_core::{JobId, JobStatus, Sanitizer};

use crate::queue::{Delivery, JobQueue};
use crate::store::{JobStore, JobUpdate, StoreError};
use crate::vendor::{CallOutcome, VendorError, VendorGateway};

/// Worker pool configuration.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of concurrent workers sharing the consumer group.
    pub workers: usize,
    /// How long one dequeue call blocks waiting for a message.
    pub dequeue_block: Duration,
    /// Consumer name prefix; workers are named `{prefix}-{index}`.
    pub consumer_prefix: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            dequeue_block: Duration::from_secs(1),
            consumer_prefix: "worker".to_string(),
        }
    }
}

/// Handle to a running worker pool.
pub struct DispatcherHandle {
    shutdown: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl DispatcherHandle {
    /// Request graceful shutdown and wait for the workers to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for join in self.joins {
            let _ = join.await;
        }
    }
}

/// Consumes queue messages and drives jobs through the vendor call.
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    vendors: Arc<dyn VendorGateway>,
    sanitizer: Sanitizer,
    max_attempts: u32,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        vendors: Arc<dyn VendorGateway>,
        sanitizer: Sanitizer,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            queue,
            vendors,
            sanitizer,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Spawn the worker pool.
    pub fn spawn(self: Arc<Self>, config: DispatcherConfig) -> DispatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let joins = (0..config.workers.max(1))
            .map(|i| {
                let dispatcher = self.clone();
                let consumer = format!("{}-{}", config.consumer_prefix, i);
                let block = config.dequeue_block;
                let mut shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    info!(%consumer, "worker started");
                    loop {
                        tokio::select! {
                            _ = shutdown.changed() => break,
                            claimed = dispatcher.queue.dequeue(&consumer, block) => match claimed {
                                Ok(Some(delivery)) => dispatcher.process(&delivery).await,
                                Ok(None) => {}
                                Err(e) => {
                                    error!(%consumer, error = %e, "dequeue failed");
                                    tokio::time::sleep(block).await;
                                }
                            },
                        }
                    }
                    info!(%consumer, "worker stopped");
                })
            })
            .collect();

        DispatcherHandle {
            shutdown: shutdown_tx,
            joins,
        }
    }

    /// Handle one delivery end to end. Public so tests can drive single
    /// steps without a running pool.
    pub async fn process(&self, delivery: &Delivery) {
        let id = delivery.job_id;

        // Claim. Conflict means another worker owns it or it is already
        // settled: acknowledge and discard the redelivery.
        let job = match self
            .store
            .update_if(id, JobStatus::Pending, JobUpdate::status(JobStatus::Processing))
            .await
        {
            Ok(job) => job,
            Err(StoreError::Conflict { actual, .. }) => {
                if actual == JobStatus::Processing && delivery.delivery_count > 1 {
                    // The previous claimant held this delivery for a full
                    // visibility window without finishing: assume it crashed
                    // and hand the job back to the queue.
                    warn!(job_id = %id, "reclaiming job from crashed worker");
                    let _ = self
                        .store
                        .update_if(
                            id,
                            JobStatus::Processing,
                            JobUpdate::status(JobStatus::Pending),
                        )
                        .await;
                    // Not acked: the next redelivery claims it normally.
                    return;
                }
                debug!(job_id = %id, %actual, "job already claimed or settled, discarding delivery");
                self.ack(delivery).await;
                return;
            }
            Err(StoreError::NotFound(_)) => {
                warn!(job_id = %id, "queue message for unknown job, discarding");
                self.ack(delivery).await;
                return;
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "claim failed, leaving delivery for retry");
                return;
            }
        };

        let attempt = job.attempt_count + 1;
        debug!(job_id = %id, vendor = %job.vendor, attempt, "dispatching vendor call");

        match self.vendors.call(&job).await {
            Ok(CallOutcome::Completed(data)) => {
                let sanitized = self.sanitizer.sanitize(&data);
                let finalize = JobUpdate::complete(sanitized).with_attempt_count(attempt);
                if self.finalize(id, JobStatus::Processing, finalize).await {
                    info!(job_id = %id, attempt, "job complete");
                    self.ack(delivery).await;
                }
            }
            Ok(CallOutcome::Accepted) => {
                let update =
                    JobUpdate::status(JobStatus::AwaitingCallback).with_attempt_count(attempt);
                if self.finalize(id, JobStatus::Processing, update).await {
                    info!(job_id = %id, attempt, "job awaiting vendor callback");
                    self.ack(delivery).await;
                }
            }
            Err(VendorError::Fatal(msg)) => {
                let update = JobUpdate::failed(format!("fatal vendor error: {msg}"))
                    .with_attempt_count(attempt);
                if self.finalize(id, JobStatus::Processing, update).await {
                    warn!(job_id = %id, attempt, error = %msg, "job failed (fatal)");
                    self.ack(delivery).await;
                }
            }
            Err(VendorError::Retryable(msg)) => {
                if attempt >= self.max_attempts {
                    let update = JobUpdate::failed(format!(
                        "retries exhausted after {attempt} attempts: {msg}"
                    ))
                    .with_attempt_count(attempt);
                    if self.finalize(id, JobStatus::Processing, update).await {
                        warn!(job_id = %id, attempt, error = %msg, "job failed (retries exhausted)");
                        self.ack(delivery).await;
                    }
                } else {
                    // Back to pending; the unacked delivery redelivers after
                    // the visibility timeout, which doubles as the backoff.
                    let update =
                        JobUpdate::status(JobStatus::Pending).with_attempt_count(attempt);
                    match self
                        .store
                        .update_if(id, JobStatus::Processing, update)
                        .await
                    {
                        Ok(_) => {
                            debug!(job_id = %id, attempt, error = %msg, "retryable failure, requeued");
                        }
                        Err(StoreError::Conflict { .. }) => self.ack(delivery).await,
                        Err(e) => error!(job_id = %id, error = %e, "requeue update failed"),
                    }
                }
            }
        }
    }

    /// Apply a terminal-ish update; `Conflict` means another finalizer won,
    /// in which case the delivery is still consumed. Returns whether the
    /// caller should ack-and-log the success path.
    async fn finalize(&self, id: JobId, expected: JobStatus, update: JobUpdate) -> bool {
        match self.store.update_if(id, expected, update).await {
            Ok(_) => true,
            Err(StoreError::Conflict { actual, .. }) => {
                debug!(job_id = %id, %actual, "finalize lost the race, discarding");
                // The winner already settled the job; consume the message.
                true
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "finalize failed, leaving delivery for retry");
                false
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = self.queue.ack(delivery).await {
            // At-least-once: a failed ack only means a redundant redelivery.
            warn!(message_id = %delivery.message_id, error = %e, "ack failed");
        }
    }
}
