//! Redis Streams-backed job queue (durable, at-least-once delivery).
//!
//! Uses XADD/XREADGROUP/XACK with one consumer group shared by all workers:
//! each message is claimed by exactly one consumer while unacknowledged, and
//! XAUTOCLAIM moves deliveries whose visibility timeout elapsed back to a
//! live consumer. Delivery counts come from the group's pending-entries list,
//! so the dispatcher can observe redeliveries.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::Value;
use tracing::warn;

use fetchgate_core::JobId;

use super::{Delivery, JobQueue, QueueError};

/// Default stream key for job messages.
const DEFAULT_STREAM_KEY: &str = "fetchgate:jobs";

/// Default consumer group shared by the worker pool.
const DEFAULT_GROUP: &str = "dispatchers";

#[derive(Debug, Clone)]
pub struct RedisStreamsQueue {
    client: redis::Client,
    stream_key: String,
    group: String,
    visibility_timeout: Duration,
}

impl RedisStreamsQueue {
    /// Open a queue on `redis_url`.
    ///
    /// `stream_key` and `group` default to `fetchgate:jobs` / `dispatchers`.
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: Option<String>,
        group: Option<String>,
        visibility_timeout: Duration,
    ) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
            group: group.unwrap_or_else(|| DEFAULT_GROUP.to_string()),
            visibility_timeout,
        })
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))
    }

    /// Create the consumer group if it does not exist yet (idempotent).
    pub async fn ensure_group(&self) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;

        // XGROUP CREATE with MKSTREAM creates the stream as well; BUSYGROUP
        // means the group already exists and is not an error.
        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::Command(format!("XGROUP CREATE failed: {e}"))),
        }
    }

    /// Reclaim one delivery whose visibility timeout elapsed, if any.
    async fn autoclaim(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        consumer: &str,
    ) -> Result<Option<Delivery>, QueueError> {
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(consumer)
            .arg(self.visibility_timeout.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(format!("XAUTOCLAIM failed: {e}")))?;

        // Reply: [next-cursor, [entry, ...], ...]; we only asked for one.
        let mut parts = match reply {
            Value::Bulk(parts) => parts.into_iter(),
            _ => return Ok(None),
        };
        let _cursor = parts.next();
        let entries = match parts.next() {
            Some(Value::Bulk(entries)) => entries,
            _ => return Ok(None),
        };

        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };

        let (message_id, fields) = parse_entry(entry)?;
        let delivery_count = self.pending_delivery_count(conn, &message_id).await?;
        Ok(Some(delivery_from_fields(
            message_id,
            &fields,
            delivery_count,
        )?))
    }

    /// Read one new message for this consumer, blocking up to `block`.
    async fn read_new(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(format!("XREADGROUP failed: {e}")))?;

        // Reply: [[stream-name, [entry, ...]]] or Nil on block timeout.
        let streams = match reply {
            Value::Nil => return Ok(None),
            Value::Bulk(streams) => streams,
            other => {
                return Err(QueueError::Malformed(format!(
                    "unexpected XREADGROUP reply: {other:?}"
                )));
            }
        };

        let Some(Value::Bulk(stream)) = streams.into_iter().next() else {
            return Ok(None);
        };
        let Some(Value::Bulk(entries)) = stream.into_iter().nth(1) else {
            return Ok(None);
        };
        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };

        let (message_id, fields) = parse_entry(entry)?;
        delivery_from_fields(message_id, &fields, 1).map(Some)
    }

    /// Delivery count of a pending entry (XPENDING extended form).
    async fn pending_delivery_count(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        message_id: &str,
    ) -> Result<u32, QueueError> {
        let reply: Value = redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(message_id)
            .arg(message_id)
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| QueueError::Command(format!("XPENDING failed: {e}")))?;

        // Entry: [id, consumer, idle-ms, delivery-count].
        if let Value::Bulk(entries) = reply {
            if let Some(Value::Bulk(entry)) = entries.into_iter().next() {
                if let Some(Value::Int(count)) = entry.into_iter().nth(3) {
                    return Ok(count.max(1) as u32);
                }
            }
        }
        Ok(1)
    }
}

/// Parse one stream entry: `[message_id, [field, value, ...]]`.
fn parse_entry(entry: Value) -> Result<(String, HashMap<String, String>), QueueError> {
    let mut parts = match entry {
        Value::Bulk(parts) => parts.into_iter(),
        other => {
            return Err(QueueError::Malformed(format!(
                "unexpected stream entry: {other:?}"
            )));
        }
    };

    let message_id = parts
        .next()
        .and_then(|v| value_to_string(&v))
        .ok_or_else(|| QueueError::Malformed("stream entry missing id".to_string()))?;

    let mut fields = HashMap::new();
    if let Some(Value::Bulk(kvs)) = parts.next() {
        for pair in kvs.chunks(2) {
            if let [k, v] = pair {
                if let (Some(k), Some(v)) = (value_to_string(k), value_to_string(v)) {
                    fields.insert(k, v);
                }
            }
        }
    }

    Ok((message_id, fields))
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).to_string()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

fn delivery_from_fields(
    message_id: String,
    fields: &HashMap<String, String>,
    delivery_count: u32,
) -> Result<Delivery, QueueError> {
    let job_id = fields
        .get("job_id")
        .ok_or_else(|| QueueError::Malformed(format!("message {message_id} missing job_id")))?
        .parse::<JobId>()
        .map_err(|e| QueueError::Malformed(format!("message {message_id}: {e}")))?;

    let enqueued_at = fields
        .get("enqueued_at")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| {
            warn!(%message_id, "queue message missing enqueued_at, defaulting to now");
            Utc::now()
        });

    Ok(Delivery {
        job_id,
        message_id,
        delivery_count,
        enqueued_at,
    })
}

#[async_trait]
impl JobQueue for RedisStreamsQueue {
    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;

        let _id: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("job_id")
            .arg(job_id.to_string())
            .arg("enqueued_at")
            .arg(Utc::now().to_rfc3339())
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    async fn dequeue(
        &self,
        consumer: &str,
        block: Duration,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn().await?;

        // Expired pending entries first, then new messages.
        if let Some(delivery) = self.autoclaim(&mut conn, consumer).await? {
            return Ok(Some(delivery));
        }
        self.read_new(&mut conn, consumer, block).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn().await?;

        let _acked: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(&delivery.message_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XACK failed: {e}")))?;

        Ok(())
    }

    async fn len(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn().await?;

        redis::cmd("XLEN")
            .arg(&self.stream_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::Command(format!("XLEN failed: {e}")))
    }
}
