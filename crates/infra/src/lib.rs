//! Infrastructure layer: job store, queue, vendor adapters, workers.

pub mod config;
pub mod dispatch;
pub mod queue;
pub mod ratelimit;
pub mod reconcile;
pub mod store;
pub mod sweep;
pub mod vendor;

pub use config::Config;
pub use dispatch::{Dispatcher, DispatcherConfig, DispatcherHandle};
pub use queue::{Delivery, JobQueue, QueueError};
pub use ratelimit::{BucketSettings, RateLimitExceeded, RateLimiter};
pub use reconcile::{ReconcileOutcome, Reconciler};
pub use store::{JobStore, JobUpdate, StoreError};
pub use sweep::{Sweeper, SweeperHandle};
pub use vendor::{CallOutcome, HttpVendors, VendorAdapter, VendorError, VendorGateway};
