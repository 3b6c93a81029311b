//! Webhook reconciliation.
//!
//! When an async vendor calls back with a result, the gateway has to marry
//! that callback to the parked job. Duplicate callbacks and callbacks racing
//! the timeout sweep both resolve through the store's conditional update:
//! only a job still in `awaiting_callback` accepts the result, and every
//! other outcome is reported without mutating anything.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use fetchgate_core::{JobId, JobStatus, Sanitizer};

use crate::store::{JobStore, JobUpdate, StoreError};

/// What a callback application amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The callback settled the job.
    Completed,
    /// The job was already terminal (duplicate callback, or the timeout
    /// sweep got there first). Reported as success to the vendor so it
    /// stops retrying.
    AlreadySettled,
    /// No job with that id.
    NotFound,
}

/// Applies vendor callbacks to parked jobs.
pub struct Reconciler {
    store: Arc<dyn JobStore>,
    sanitizer: Sanitizer,
}

impl Reconciler {
    pub fn new(store: Arc<dyn JobStore>, sanitizer: Sanitizer) -> Self {
        Self { store, sanitizer }
    }

    /// Apply one callback: sanitize `data` and complete the job if it is
    /// still waiting.
    pub async fn apply(
        &self,
        job_id: JobId,
        data: &JsonValue,
    ) -> Result<ReconcileOutcome, StoreError> {
        let sanitized = self.sanitizer.sanitize(data);

        match self
            .store
            .update_if(
                job_id,
                JobStatus::AwaitingCallback,
                JobUpdate::complete(sanitized),
            )
            .await
        {
            Ok(_) => {
                info!(%job_id, "vendor callback completed job");
                Ok(ReconcileOutcome::Completed)
            }
            Err(StoreError::Conflict { actual, .. }) if actual.is_terminal() => {
                debug!(%job_id, %actual, "callback for settled job, ignoring");
                Ok(ReconcileOutcome::AlreadySettled)
            }
            Err(StoreError::Conflict { actual, .. }) => {
                // Callback before the dispatcher parked the job; the vendor
                // will retry, and by then the job should be waiting.
                warn!(%job_id, %actual, "callback for job not yet awaiting, ignoring");
                Ok(ReconcileOutcome::AlreadySettled)
            }
            Err(StoreError::NotFound(_)) => {
                warn!(%job_id, "callback for unknown job");
                Ok(ReconcileOutcome::NotFound)
            }
            Err(e) => Err(e),
        }
    }
}
