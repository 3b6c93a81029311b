use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use fetchgate_core::Sanitizer;
use fetchgate_infra::config::Config;
use fetchgate_infra::queue::RedisStreamsQueue;
use fetchgate_infra::reconcile::Reconciler;
use fetchgate_infra::store::PostgresJobStore;

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

    let reconciler = Arc::new(Reconciler::new(store.clone(), Sanitizer::default()));

    let app = fetchgate_api::app::build_router(fetchgate_api::app::AppContext {
        store,
        queue,
        reconciler,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
