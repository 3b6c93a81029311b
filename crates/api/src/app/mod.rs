//! Router assembly and shared handler state.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{Extension, Router};

use fetchgate_infra::queue::JobQueue;
use fetchgate_infra::reconcile::Reconciler;
use fetchgate_infra::store::JobStore;

pub mod dto;
pub mod errors;
pub mod routes;

/// Everything the handlers need, injected as one extension. Trait objects so
/// tests can wire in-memory fakes behind the same router.
#[derive(Clone)]
pub struct AppContext {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
    pub reconciler: Arc<Reconciler>,
}

pub fn build_router(context: AppContext) -> Router {
    Router::new()
        .route("/jobs", post(routes::create_job))
        .route("/jobs/:id", get(routes::get_job))
        .route("/vendor-webhook/:vendor", post(routes::vendor_webhook))
        .route("/health", get(routes::health))
        .layer(Extension(context))
}
