//! In-memory job store for tests/dev.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use fetchgate_core::{Job, JobId, JobStatus, VendorKind};

use super::{JobStore, JobUpdate, StoreError};

/// In-memory store. The compare-and-swap in `update_if` happens under a
/// single write lock, so it is linearizable just like the Postgres version.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

fn apply(job: &mut Job, update: JobUpdate) {
    job.status = update.status;
    // result iff complete, error iff failed.
    job.result = if update.status == JobStatus::Complete {
        update.result
    } else {
        None
    };
    job.error = if update.status == JobStatus::Failed {
        update.error
    } else {
        None
    };
    if let Some(n) = update.attempt_count {
        job.attempt_count = n;
    }
    job.updated_at = Utc::now();
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, payload: JsonValue, vendor: VendorKind) -> Result<Job, StoreError> {
        let job = Job::new(payload, vendor);
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;
        jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;
        Ok(jobs.get(&id).cloned())
    }

    async fn update_if(
        &self,
        id: JobId,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, StoreError> {
        if !expected.can_transition_to(update.status) {
            return Err(StoreError::IllegalTransition {
                id,
                from: expected,
                to: update.status,
            });
        }

        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        if job.status != expected {
            return Err(StoreError::Conflict {
                id,
                expected,
                actual: job.status,
            });
        }

        apply(job, update);
        Ok(job.clone())
    }

    async fn awaiting_callback_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| StoreError::Storage("lock poisoned".into()))?;
        let mut stale: Vec<_> = jobs
            .values()
            .filter(|j| j.status == JobStatus::AwaitingCallback && j.updated_at < cutoff)
            .map(|j| (j.updated_at, j.id))
            .collect();
        stale.sort_by_key(|(updated_at, _)| *updated_at);
        Ok(stale.into_iter().map(|(_, id)| id).collect())
    }
}
