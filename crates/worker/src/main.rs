use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use fetchgate_core::Sanitizer;
use fetchgate_infra::config::Config;
use fetchgate_infra::dispatch::{Dispatcher, DispatcherConfig};
use fetchgate_infra::queue::RedisStreamsQueue;
use fetchgate_infra::ratelimit::RateLimiter;
use fetchgate_infra::store::PostgresJobStore;
use fetchgate_infra::sweep::Sweeper;
use fetchgate_infra::vendor::{HttpVendors, VendorAdapter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fetchgate_observability::init();

    let config = Config::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = Arc::new(PostgresJobStore::new(pool));
    store.migrate().await?;

    let queue = Arc::new(RedisStreamsQueue::new(
        &config.redis_url,
        None,
        None,
        config.visibility_timeout,
    )?);
    queue.ensure_group().await?;

    let limiter = Arc::new(RateLimiter::new(config.rate_limit, config.rate_limit_max_wait));
    let vendors = Arc::new(HttpVendors::new(
        VendorAdapter::sync(&config.sync_vendor_url),
        VendorAdapter::asynchronous(&config.async_vendor_url, config.webhook_url()),
        limiter,
        config.vendor_timeout,
    )?);

    let dispatcher = Arc::new(Dispatcher::new(
        store.clone(),
        queue,
        vendors,
        Sanitizer::default(),
        config.max_attempts,
    ));
    let dispatcher_handle = dispatcher.spawn(DispatcherConfig {
        workers: config.workers,
        ..DispatcherConfig::default()
    });

    let sweeper_handle =
        Sweeper::new(store, config.callback_timeout).spawn(config.sweep_interval);

    tracing::info!(workers = config.workers, "worker pool running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    dispatcher_handle.shutdown().await;
    sweeper_handle.shutdown().await;
    Ok(())
}
