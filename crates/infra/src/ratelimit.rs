//! Per-vendor rate limiting.
//!
//! Token bucket with continuous refill based on elapsed time. Each vendor
//! gets its own bucket; there is no cross-vendor sharing of capacity.
//! Callers wait for a token up to a configured bound; exceeding the bound is
//! reported as [`RateLimitExceeded`], which the vendor adapter classifies as
//! a retryable failure.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Capacity + refill rate for one bucket.
#[derive(Debug, Clone, Copy)]
pub struct BucketSettings {
    /// Maximum tokens the bucket can hold (burst size).
    pub capacity: u32,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl Default for BucketSettings {
    fn default() -> Self {
        Self {
            capacity: 5,
            refill_per_sec: 5.0,
        }
    }
}

/// Token bucket with continuous refill.
#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(settings: BucketSettings) -> Self {
        Self {
            capacity: settings.capacity as f64,
            tokens: settings.capacity as f64,
            refill_per_sec: settings.refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        if elapsed <= 0.0 {
            return;
        }
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// How long until one token will be available.
    fn time_until_available(&mut self) -> Duration {
        self.refill();
        if self.tokens >= 1.0 {
            return Duration::ZERO;
        }
        if self.refill_per_sec <= 0.0 {
            // Never refills; the wait bound will trip.
            return Duration::from_secs(3600);
        }
        Duration::from_secs_f64((1.0 - self.tokens) / self.refill_per_sec)
    }
}

/// Permit acquisition timed out.
#[derive(Debug, Clone, thiserror::Error)]
#[error("rate limit wait bound exceeded for vendor {vendor}")]
pub struct RateLimitExceeded {
    pub vendor: String,
}

/// Per-vendor token-bucket gate.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    settings: HashMap<String, BucketSettings>,
    default_settings: BucketSettings,
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(default_settings: BucketSettings, max_wait: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            settings: HashMap::new(),
            default_settings,
            max_wait,
        }
    }

    /// Override capacity/refill for a specific vendor.
    pub fn with_vendor(mut self, vendor: impl Into<String>, settings: BucketSettings) -> Self {
        self.settings.insert(vendor.into(), settings);
        self
    }

    /// Consume a token or report how long until one is available.
    fn try_acquire(&self, vendor: &str) -> Result<(), Duration> {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets.entry(vendor.to_string()).or_insert_with(|| {
            let settings = self
                .settings
                .get(vendor)
                .copied()
                .unwrap_or(self.default_settings);
            TokenBucket::new(settings)
        });

        if bucket.try_consume() {
            Ok(())
        } else {
            Err(bucket.time_until_available())
        }
    }

    /// Acquire a permit for `vendor`, waiting at most the configured bound.
    pub async fn acquire(&self, vendor: &str) -> Result<(), RateLimitExceeded> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            match self.try_acquire(vendor) {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    if Instant::now() + wait > deadline {
                        return Err(RateLimitExceeded {
                            vendor: vendor.to_string(),
                        });
                    }
                    tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
                }
            }
        }
    }
}
