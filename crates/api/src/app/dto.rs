use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use fetchgate_core::{Job, JobId};

// -------------------------
// Request DTOs
// -------------------------

/// Async vendor callback body.
///
/// `job_id` stays a string here so a malformed id gets a 400 from the
/// handler instead of the extractor's generic body rejection.
#[derive(Debug, Deserialize)]
pub struct WebhookRequest {
    pub job_id: String,
    #[serde(default)]
    pub data: JsonValue,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub request_id: JobId,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl From<Job> for JobStatusResponse {
    fn from(job: Job) -> Self {
        Self {
            status: job.status.to_string(),
            result: job.result,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}
