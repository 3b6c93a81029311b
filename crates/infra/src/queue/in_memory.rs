//! In-memory queue for tests/dev.
//!
//! Mirrors the Redis Streams semantics: claimed messages sit in an in-flight
//! set and become re-deliverable once their visibility timeout expires
//! without an ack.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use fetchgate_core::JobId;

use super::{Delivery, JobQueue, QueueError};

#[derive(Debug, Clone)]
struct Message {
    id: String,
    job_id: JobId,
    enqueued_at: DateTime<Utc>,
    delivery_count: u32,
}

#[derive(Debug)]
struct InFlight {
    message: Message,
    claimed_at: Instant,
}

/// In-memory at-least-once queue with visibility-timeout redelivery.
#[derive(Debug)]
pub struct InMemoryQueue {
    ready: Mutex<VecDeque<Message>>,
    in_flight: Mutex<HashMap<String, InFlight>>,
    visibility_timeout: Duration,
    next_id: AtomicU64,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            ready: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashMap::new()),
            visibility_timeout,
            next_id: AtomicU64::new(1),
        }
    }

    /// Move expired in-flight messages back to the front of the ready queue.
    fn redeliver_expired(&self) {
        let mut in_flight = self.in_flight.lock().unwrap();
        let expired: Vec<String> = in_flight
            .iter()
            .filter(|(_, f)| f.claimed_at.elapsed() >= self.visibility_timeout)
            .map(|(id, _)| id.clone())
            .collect();

        if expired.is_empty() {
            return;
        }

        let mut ready = self.ready.lock().unwrap();
        for id in expired {
            if let Some(f) = in_flight.remove(&id) {
                ready.push_front(f.message);
            }
        }
    }

    fn try_claim(&self) -> Option<Delivery> {
        self.redeliver_expired();

        let mut ready = self.ready.lock().unwrap();
        let mut message = ready.pop_front()?;
        message.delivery_count += 1;

        let delivery = Delivery {
            job_id: message.job_id,
            message_id: message.id.clone(),
            delivery_count: message.delivery_count,
            enqueued_at: message.enqueued_at,
        };

        self.in_flight.lock().unwrap().insert(
            message.id.clone(),
            InFlight {
                message,
                claimed_at: Instant::now(),
            },
        );

        Some(delivery)
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.ready.lock().unwrap().push_back(Message {
            id: id.to_string(),
            job_id,
            enqueued_at: Utc::now(),
            delivery_count: 0,
        });
        Ok(())
    }

    async fn dequeue(
        &self,
        _consumer: &str,
        block: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + block;
        loop {
            if let Some(delivery) = self.try_claim() {
                return Ok(Some(delivery));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.in_flight.lock().unwrap().remove(&delivery.message_id);
        Ok(())
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let ready = self.ready.lock().unwrap().len();
        let in_flight = self.in_flight.lock().unwrap().len();
        Ok((ready + in_flight) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_claim_and_ack() {
        let queue = InMemoryQueue::new(Duration::from_secs(30));
        let a = JobId::new();
        let b = JobId::new();
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        let first = queue
            .dequeue("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.job_id, a);
        assert_eq!(first.delivery_count, 1);

        queue.ack(&first).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn claimed_message_invisible_to_other_consumers() {
        let queue = InMemoryQueue::new(Duration::from_secs(30));
        queue.enqueue(JobId::new()).await.unwrap();

        assert!(
            queue
                .dequeue("w1", Duration::from_millis(10))
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            queue
                .dequeue("w2", Duration::from_millis(10))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn unacked_message_redelivers_after_visibility_timeout() {
        let queue = InMemoryQueue::new(Duration::from_millis(20));
        let id = JobId::new();
        queue.enqueue(id).await.unwrap();

        let first = queue
            .dequeue("w1", Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.delivery_count, 1);

        // Never acked; after the visibility timeout a second consumer gets it.
        let second = queue
            .dequeue("w2", Duration::from_millis(200))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.job_id, id);
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.delivery_count, 2);
    }

    #[tokio::test]
    async fn dequeue_blocks_then_returns_none() {
        let queue = InMemoryQueue::new(Duration::from_secs(30));
        let started = Instant::now();
        let claimed = queue.dequeue("w1", Duration::from_millis(30)).await.unwrap();
        assert!(claimed.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
