//! Durable job storage.
//!
//! The store owns every job record. The only mutation primitive beyond
//! `create` is the conditional update: callers state the status they believe
//! holds, and if the stored status differs the call fails with
//! [`StoreError::Conflict`] and mutates nothing. That compare-and-swap is the
//! sole synchronization point of the whole system; two concurrent finalizers
//! (say a timeout sweep and a late webhook) resolve by exactly one winning
//! and the loser discarding its work.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use fetchgate_core::{Job, JobId, JobStatus, VendorKind};

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

/// Fields a conditional update may change.
///
/// `result` is only kept when the target status is `Complete`, `error` only
/// when it is `Failed`; the store enforces the iff-invariants from the data
/// model regardless of what the caller passes.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub result: Option<JsonValue>,
    pub error: Option<String>,
    pub attempt_count: Option<u32>,
}

impl JobUpdate {
    /// Plain status change.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            result: None,
            error: None,
            attempt_count: None,
        }
    }

    /// Finalize with a (sanitized) result.
    pub fn complete(result: JsonValue) -> Self {
        Self {
            status: JobStatus::Complete,
            result: Some(result),
            error: None,
            attempt_count: None,
        }
    }

    /// Finalize with an error classification + message.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            result: None,
            error: Some(error.into()),
            attempt_count: None,
        }
    }

    pub fn with_attempt_count(mut self, attempt_count: u32) -> Self {
        self.attempt_count = Some(attempt_count);
        self
    }
}

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// The stored status did not match the caller's expectation. Never
    /// surfaced to external callers; the losing operation is discarded.
    #[error("conditional update conflict for {id}: expected {expected}, found {actual}")]
    Conflict {
        id: JobId,
        expected: JobStatus,
        actual: JobStatus,
    },

    /// The requested edge is not part of the status state graph. This is a
    /// caller bug, not a race.
    #[error("illegal transition for {id}: {from} -> {to}")]
    IllegalTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Durable, keyed job storage with conditional updates.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a fresh pending job and return it.
    async fn create(&self, payload: JsonValue, vendor: VendorKind) -> Result<Job, StoreError>;

    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Apply `update` iff the stored status equals `expected`.
    ///
    /// Stamps `updated_at`. Returns the updated job on success.
    async fn update_if(
        &self,
        id: JobId,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, StoreError>;

    /// Ids of `awaiting_callback` jobs whose `updated_at` is before `cutoff`
    /// (the timeout sweep's scan).
    async fn awaiting_callback_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError>;
}
