//! The job record and its status state machine.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::DomainError;
use crate::id::JobId;

/// Which vendor variant handles a job.
///
/// A closed set: a sync vendor replies inline, an async vendor only accepts
/// the request and delivers the result later through the webhook. Chosen at
/// creation time and immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorKind {
    Sync,
    Async,
}

impl VendorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorKind::Sync => "sync",
            VendorKind::Async => "async",
        }
    }
}

impl core::fmt::Display for VendorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VendorKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(VendorKind::Sync),
            "async" => Ok(VendorKind::Async),
            other => Err(DomainError::validation(format!(
                "unknown vendor: {other:?} (expected \"sync\" or \"async\")"
            ))),
        }
    }
}

/// Job lifecycle status.
///
/// `Complete` and `Failed` are terminal; every transition goes through the
/// store's conditional update, so the graph below is the whole story:
///
/// ```text
/// pending -> processing -> complete
///                       -> awaiting_callback -> complete
///                       -> awaiting_callback -> failed   (callback timeout)
///                       -> failed
///                       -> pending                        (retryable error)
/// pending -> failed                                       (never enqueued)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created and enqueued, waiting for a worker.
    Pending,
    /// Claimed by a worker, vendor call in flight.
    Processing,
    /// Async vendor accepted the request; result arrives via webhook.
    AwaitingCallback,
    /// Finished with a sanitized result.
    Complete,
    /// Finished with an error.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Whether `self -> to` is an edge of the state graph.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Complete)
                | (Processing, AwaitingCallback)
                | (Processing, Failed)
                | (Processing, Pending)
                | (AwaitingCallback, Complete)
                | (AwaitingCallback, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::AwaitingCallback => "awaiting_callback",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "awaiting_callback" => Ok(JobStatus::AwaitingCallback),
            "complete" => Ok(JobStatus::Complete),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!(
                "unknown job status: {other:?}"
            ))),
        }
    }
}

/// The durable record of one client fetch request and its lifecycle.
///
/// Owned exclusively by the job store; workers and the reconciler never hold
/// authoritative copies and always mutate through the store's conditional
/// update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique, immutable identifier.
    pub id: JobId,
    /// Vendor variant handling this job (immutable after creation).
    pub vendor: VendorKind,
    /// Opaque client payload, stored verbatim.
    pub payload: JsonValue,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Sanitized output; present iff `status == Complete`.
    pub result: Option<JsonValue>,
    /// Error classification + message; present iff `status == Failed`.
    pub error: Option<String>,
    /// Number of vendor-call attempts made so far.
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh pending job.
    pub fn new(payload: JsonValue, vendor: VendorKind) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            vendor,
            payload,
            status: JobStatus::Pending,
            result: None,
            error: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
