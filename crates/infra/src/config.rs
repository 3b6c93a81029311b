//! Environment-driven configuration.
//!
//! Every knob has a default suited to local development; only
//! `DATABASE_URL` is required (and only by binaries that talk to Postgres).

use std::time::Duration;

use crate::ratelimit::BucketSettings;

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string (`DATABASE_URL`).
    pub database_url: String,
    /// Redis connection string (`REDIS_URL`).
    pub redis_url: String,
    /// API bind address (`BIND_ADDR`).
    pub bind_addr: String,
    /// Externally reachable base URL of this gateway, used to build the
    /// webhook address handed to async vendors (`PUBLIC_BASE_URL`).
    pub public_base_url: String,
    /// Sync vendor base URL (`SYNC_VENDOR_URL`).
    pub sync_vendor_url: String,
    /// Async vendor base URL (`ASYNC_VENDOR_URL`).
    pub async_vendor_url: String,
    /// Per-job vendor call cap (`MAX_ATTEMPTS`).
    pub max_attempts: u32,
    /// Dispatcher worker count (`WORKERS`).
    pub workers: usize,
    /// HTTP timeout for vendor calls (`VENDOR_TIMEOUT_SECS`).
    pub vendor_timeout: Duration,
    /// Queue redelivery window (`VISIBILITY_TIMEOUT_SECS`).
    pub visibility_timeout: Duration,
    /// How long an `awaiting_callback` job may wait (`CALLBACK_TIMEOUT_SECS`).
    pub callback_timeout: Duration,
    /// Sweep cadence (`SWEEP_INTERVAL_SECS`).
    pub sweep_interval: Duration,
    /// Default per-vendor token bucket (`RATE_LIMIT_CAPACITY`,
    /// `RATE_LIMIT_REFILL_PER_SEC`).
    pub rate_limit: BucketSettings,
    /// Bound on the rate-limit wait (`RATE_LIMIT_MAX_WAIT_SECS`).
    pub rate_limit_max_wait: Duration,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("invalid {name}, using default");
            default
        }),
        Err(_) => default,
    }
}

fn secs_or(name: &str, default: u64) -> Duration {
    Duration::from_secs(parse_or(name, default))
}

impl Config {
    /// Load from the environment. Panics only on a missing `DATABASE_URL`,
    /// matching how the binaries want to fail at startup rather than at
    /// first query.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .expect("DATABASE_URL must be set"),
            redis_url: var_or("REDIS_URL", "redis://localhost:6379"),
            bind_addr: var_or("BIND_ADDR", "0.0.0.0:8080"),
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:8080"),
            sync_vendor_url: var_or("SYNC_VENDOR_URL", "http://localhost:8101"),
            async_vendor_url: var_or("ASYNC_VENDOR_URL", "http://localhost:8102"),
            max_attempts: parse_or("MAX_ATTEMPTS", 3),
            workers: parse_or("WORKERS", 4),
            vendor_timeout: secs_or("VENDOR_TIMEOUT_SECS", 10),
            visibility_timeout: secs_or("VISIBILITY_TIMEOUT_SECS", 30),
            callback_timeout: secs_or("CALLBACK_TIMEOUT_SECS", 60),
            sweep_interval: secs_or("SWEEP_INTERVAL_SECS", 10),
            rate_limit: BucketSettings {
                capacity: parse_or("RATE_LIMIT_CAPACITY", 5),
                refill_per_sec: parse_or("RATE_LIMIT_REFILL_PER_SEC", 5.0),
            },
            rate_limit_max_wait: secs_or("RATE_LIMIT_MAX_WAIT_SECS", 5),
        }
    }

    /// Webhook address handed to async vendors so their callbacks route
    /// back to this gateway.
    pub fn webhook_url(&self) -> String {
        format!(
            "{}/vendor-webhook/async",
            self.public_base_url.trim_end_matches('/')
        )
    }
}
