//! Vendor adapters.
//!
//! Two variants behind one capability contract: a sync vendor returns the
//! result inline, an async vendor only acknowledges acceptance and delivers
//! the result later through the gateway's webhook. Both acquire a rate-limit
//! permit before issuing the HTTP call, and both classify failures into
//! retryable (connect/timeout/5xx, rate-limit wait exceeded) vs fatal
//! (4xx, vendor-reported rejection).
//!
//! Wire contract (`POST {vendor_base}/process`):
//! - request: `{"job_id": ..., "payload": ...}`, plus `"webhook_url"` for the
//!   async variant;
//! - sync reply: `{"success": bool, "data": {...}, "error": ...}`;
//! - async reply: any 2xx means *accepted*, nothing more.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use fetchgate_core::{Job, VendorKind};

use crate::ratelimit::RateLimiter;

/// Vendor call failure, classified for the retry loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VendorError {
    /// Transient: network error, timeout, 5xx, rate-limit wait exceeded.
    #[error("retryable vendor error: {0}")]
    Retryable(String),

    /// Permanent: 4xx, malformed exchange, vendor-reported rejection.
    #[error("fatal vendor error: {0}")]
    Fatal(String),
}

impl VendorError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, VendorError::Retryable(_))
    }
}

/// Successful vendor call outcome.
#[derive(Debug, Clone)]
pub enum CallOutcome {
    /// Sync vendor replied inline with (unsanitized) result data.
    Completed(JsonValue),
    /// Async vendor accepted the request; the result arrives via webhook.
    Accepted,
}

/// Capability seam the dispatcher calls through; production uses
/// [`HttpVendors`], tests substitute fakes.
#[async_trait]
pub trait VendorGateway: Send + Sync {
    async fn call(&self, job: &Job) -> Result<CallOutcome, VendorError>;
}

/// One configured vendor endpoint, closed over the two variants.
#[derive(Debug, Clone)]
pub enum VendorAdapter {
    Sync { base_url: String },
    Async { base_url: String, webhook_url: String },
}

impl VendorAdapter {
    pub fn sync(base_url: impl Into<String>) -> Self {
        VendorAdapter::Sync {
            base_url: base_url.into(),
        }
    }

    pub fn asynchronous(base_url: impl Into<String>, webhook_url: impl Into<String>) -> Self {
        VendorAdapter::Async {
            base_url: base_url.into(),
            webhook_url: webhook_url.into(),
        }
    }

    pub fn kind(&self) -> VendorKind {
        match self {
            VendorAdapter::Sync { .. } => VendorKind::Sync,
            VendorAdapter::Async { .. } => VendorKind::Async,
        }
    }

    async fn call(&self, http: &reqwest::Client, job: &Job) -> Result<CallOutcome, VendorError> {
        match self {
            VendorAdapter::Sync { base_url } => {
                let response = http
                    .post(format!("{base_url}/process"))
                    .json(&serde_json::json!({
                        "job_id": job.id,
                        "payload": job.payload,
                    }))
                    .send()
                    .await
                    .map_err(classify_transport_error)?;

                check_status(response.status())?;

                let reply: SyncReply = response
                    .json()
                    .await
                    .map_err(|e| VendorError::Fatal(format!("malformed vendor response: {e}")))?;

                if reply.success {
                    Ok(CallOutcome::Completed(
                        reply.data.unwrap_or(JsonValue::Object(Default::default())),
                    ))
                } else {
                    Err(VendorError::Fatal(
                        reply
                            .error
                            .unwrap_or_else(|| "vendor rejected the request".to_string()),
                    ))
                }
            }
            VendorAdapter::Async {
                base_url,
                webhook_url,
            } => {
                let response = http
                    .post(format!("{base_url}/process"))
                    .json(&serde_json::json!({
                        "job_id": job.id,
                        "payload": job.payload,
                        "webhook_url": webhook_url,
                    }))
                    .send()
                    .await
                    .map_err(classify_transport_error)?;

                check_status(response.status())?;
                debug!(job_id = %job.id, "async vendor accepted request");
                Ok(CallOutcome::Accepted)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct SyncReply {
    success: bool,
    #[serde(default)]
    data: Option<JsonValue>,
    #[serde(default)]
    error: Option<String>,
}

fn classify_transport_error(e: reqwest::Error) -> VendorError {
    if e.is_timeout() || e.is_connect() {
        VendorError::Retryable(format!("vendor unreachable: {e}"))
    } else if e.is_request() {
        VendorError::Fatal(format!("malformed vendor request: {e}"))
    } else {
        VendorError::Retryable(e.to_string())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), VendorError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Err(VendorError::Retryable(format!("vendor returned {status}")))
    } else {
        Err(VendorError::Fatal(format!("vendor returned {status}")))
    }
}

/// Production vendor gateway: one HTTP client, one rate limiter, both
/// adapters; selects the variant by the job's vendor field.
pub struct HttpVendors {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    sync: VendorAdapter,
    r#async: VendorAdapter,
}

impl HttpVendors {
    pub fn new(
        sync: VendorAdapter,
        r#async: VendorAdapter,
        limiter: Arc<RateLimiter>,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()?;
        Ok(Self {
            http,
            limiter,
            sync,
            r#async,
        })
    }
}

#[async_trait]
impl VendorGateway for HttpVendors {
    async fn call(&self, job: &Job) -> Result<CallOutcome, VendorError> {
        self.limiter
            .acquire(job.vendor.as_str())
            .await
            .map_err(|e| VendorError::Retryable(format!("rate limited: {e}")))?;

        let adapter = match job.vendor {
            VendorKind::Sync => &self.sync,
            VendorKind::Async => &self.r#async,
        };
        adapter.call(&self.http, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(check_status(reqwest::StatusCode::OK).is_ok());

        let e = check_status(reqwest::StatusCode::BAD_GATEWAY).unwrap_err();
        assert!(e.is_retryable());
        let e = check_status(reqwest::StatusCode::TOO_MANY_REQUESTS).unwrap_err();
        assert!(e.is_retryable());

        let e = check_status(reqwest::StatusCode::BAD_REQUEST).unwrap_err();
        assert!(!e.is_retryable());
        let e = check_status(reqwest::StatusCode::NOT_FOUND).unwrap_err();
        assert!(!e.is_retryable());
    }

    #[test]
    fn adapter_kinds() {
        assert_eq!(VendorAdapter::sync("http://v").kind(), VendorKind::Sync);
        assert_eq!(
            VendorAdapter::asynchronous("http://v", "http://gw/vendor-webhook/async").kind(),
            VendorKind::Async
        );
    }

    #[test]
    fn sync_reply_parses_with_missing_fields() {
        let reply: SyncReply = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(reply.success);
        assert!(reply.data.is_none());

        let reply: SyncReply =
            serde_json::from_str(r#"{"success": false, "error": "no such dataset"}"#).unwrap();
        assert_eq!(reply.error.as_deref(), Some("no such dataset"));
    }
}
