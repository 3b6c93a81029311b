//! Durable job queue with consumer-group semantics.
//!
//! Contract: ordered-per-partition, at-least-once delivery. A message claimed
//! by one consumer in the group is invisible to the others until a visibility
//! timeout expires, and is only removed once acknowledged. Workers ack
//! **after** the corresponding store mutation succeeds, so a crash between
//! vendor call and ack merely causes a redelivery that the dispatcher's
//! status-keyed claim logic absorbs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fetchgate_core::JobId;

pub mod in_memory;
pub mod redis_streams;

pub use in_memory::InMemoryQueue;
pub use redis_streams::RedisStreamsQueue;

/// One claimed queue message.
///
/// Transient: owned entirely by the queue, never persisted independently of
/// the job it points at.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Correlation key into the job store.
    pub job_id: JobId,
    /// Backend message id, needed for the ack.
    pub message_id: String,
    /// How many times this message has been delivered (1 on first delivery).
    pub delivery_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

/// Queue error.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("queue message malformed: {0}")]
    Malformed(String),
}

/// Durable at-least-once job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a message for `job_id`.
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError>;

    /// Claim the next message for this consumer, blocking up to `block`.
    ///
    /// Returns expired-visibility redeliveries before new messages.
    async fn dequeue(&self, consumer: &str, block: Duration)
    -> Result<Option<Delivery>, QueueError>;

    /// Acknowledge a claimed message, removing it from the group's pending
    /// set. Only call after the job store mutation has durably succeeded.
    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Current queue depth (claimed + unclaimed), for logging.
    async fn len(&self) -> Result<u64, QueueError>;
}
