//! Redis Streams broker gateway.
//!
//! One logical queue = one stream `q:{name}` with a consumer group, a retry
//! sorted set `q:{name}:retry` scored by ready-at, and a DLQ stream
//! `q:{name}:dlq`. Stream entry ids are millisecond timestamps, so message
//! TTLs are enforced with `XTRIM MINID` from the scheduler loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::Value;
use tracing::{debug, info, warn};

use super::envelope::Envelope;
use super::MqError;

/// Declaration-time description of a queue family.
#[derive(Debug, Clone)]
pub struct QueueSpec {
    pub name: String,
    pub retry_name: String,
    pub dlq_name: String,
    pub group: String,
    pub max_length: i64,
    pub message_ttl: Duration,
    pub dlq_ttl: Duration,
    /// Delay before the Nth redelivery; length = max retries.
    pub retry_ladder: Vec<Duration>,
}

impl QueueSpec {
    /// The order-processing queue family.
    pub fn orders() -> Self {
        Self {
            name: "orders.processing".into(),
            retry_name: "orders.retry".into(),
            dlq_name: "orders.dlq".into(),
            group: "orderflow".into(),
            max_length: 100_000,
            message_ttl: Duration::from_secs(24 * 3600),
            dlq_ttl: Duration::from_secs(7 * 24 * 3600),
            retry_ladder: vec![
                Duration::from_secs(5 * 60),
                Duration::from_secs(15 * 60),
                Duration::from_secs(3600),
                Duration::from_secs(6 * 3600),
            ],
        }
    }

    /// The position-update queue family. Shorter ladder: position
    /// consistency is prioritized over order retries.
    pub fn positions() -> Self {
        Self {
            name: "positions.updates".into(),
            retry_name: "positions.retry".into(),
            dlq_name: "positions.dlq".into(),
            group: "orderflow".into(),
            max_length: 100_000,
            message_ttl: Duration::from_secs(6 * 3600),
            dlq_ttl: Duration::from_secs(7 * 24 * 3600),
            retry_ladder: vec![
                Duration::from_secs(2 * 60),
                Duration::from_secs(10 * 60),
                Duration::from_secs(30 * 60),
                Duration::from_secs(2 * 3600),
            ],
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.retry_ladder.len() as u32
    }

    /// Delay before redelivery `attempt` (1-based). `None` past the ladder.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 {
            return None;
        }
        self.retry_ladder.get(attempt as usize - 1).copied()
    }

    pub fn stream_key(&self) -> String {
        format!("q:{}", self.name)
    }

    pub fn retry_key(&self) -> String {
        format!("q:{}", self.retry_name)
    }

    pub fn dlq_key(&self) -> String {
        format!("q:{}", self.dlq_name)
    }
}

/// A consumed message awaiting ack.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Stream entry id; required for ack.
    pub stream_id: String,
    pub envelope: Envelope,
}

/// Publish-side capability; lets the outbox dispatcher and tests swap the
/// transport.
#[async_trait]
pub trait QueuePublisher: Send + Sync {
    async fn publish(&self, queue: &str, envelope: &Envelope) -> Result<(), MqError>;
}

/// Broker gateway over one shared Redis connection manager.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
    specs: Arc<DashMap<String, QueueSpec>>,
}

impl RedisBroker {
    pub async fn connect(broker_url: &str) -> Result<Self, MqError> {
        let client = redis::Client::open(broker_url).map_err(MqError::from)?;
        let conn = client.get_connection_manager().await.map_err(MqError::from)?;
        info!("Broker connection established");
        Ok(Self {
            conn,
            specs: Arc::new(DashMap::new()),
        })
    }

    /// Declare a queue family: creates the stream + consumer group
    /// (idempotent) and registers the spec for publish-side lookups.
    pub async fn declare(&self, spec: QueueSpec) -> Result<(), MqError> {
        let mut conn = self.conn.clone();
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(spec.stream_key())
            .arg(&spec.group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(_) => info!(queue = %spec.name, "Queue declared"),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(queue = %spec.name, "Queue already declared");
            }
            Err(e) => return Err(MqError::from(e)),
        }
        self.specs.insert(spec.name.clone(), spec);
        Ok(())
    }

    /// Declared queue specs (for the retry scheduler).
    pub fn declared(&self) -> Vec<QueueSpec> {
        self.specs.iter().map(|e| e.value().clone()).collect()
    }

    fn spec_for(&self, queue: &str) -> Result<QueueSpec, MqError> {
        self.specs
            .get(queue)
            .map(|s| s.clone())
            .ok_or_else(|| MqError::Codec(format!("queue not declared: {queue}")))
    }

    async fn xadd(&self, key: &str, max_length: i64, envelope: &Envelope) -> Result<(), MqError> {
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.conn.clone();
        let _id: String = redis::cmd("XADD")
            .arg(key)
            .arg("MAXLEN")
            .arg("~")
            .arg(max_length)
            .arg("*")
            .arg("envelope")
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Fetch up to `count` messages for `consumer`, blocking up to
    /// `block`. The returned batch is ordered by header priority, highest
    /// first, so MARKET beats LIMIT beats STOP within a read.
    pub async fn consume(
        &self,
        spec: &QueueSpec,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<Delivery>, MqError> {
        let mut conn = self.conn.clone();
        type Reply = Option<Vec<(String, Vec<(String, HashMap<String, String>)>)>>;
        let reply: Reply = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&spec.group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(spec.stream_key())
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let mut deliveries = Vec::new();
        if let Some(streams) = reply {
            for (_stream, entries) in streams {
                for (stream_id, fields) in entries {
                    match Self::entry_to_delivery(&stream_id, fields.get("envelope")) {
                        Some(d) => deliveries.push(d),
                        None => {
                            warn!(%stream_id, queue = %spec.name, "Dropping malformed stream entry");
                            self.ack(spec, &stream_id).await?;
                        }
                    }
                }
            }
        }
        deliveries.sort_by(|a, b| b.envelope.headers.priority.cmp(&a.envelope.headers.priority));
        Ok(deliveries)
    }

    /// Reclaim messages stuck pending on dead consumers.
    pub async fn claim_stale(
        &self,
        spec: &QueueSpec,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<Delivery>, MqError> {
        let mut conn = self.conn.clone();
        let value: Value = redis::cmd("XAUTOCLAIM")
            .arg(spec.stream_key())
            .arg(&spec.group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        // Reply: [next-cursor, [[id, [field, value, ...]], ...], (deleted)]
        let mut deliveries = Vec::new();
        if let Value::Bulk(items) = value {
            if let Some(Value::Bulk(entries)) = items.get(1) {
                for entry in entries {
                    if let Some(d) = Self::parse_raw_entry(entry) {
                        deliveries.push(d);
                    }
                }
            }
        }
        if !deliveries.is_empty() {
            info!(count = deliveries.len(), queue = %spec.name, "Reclaimed stale deliveries");
        }
        Ok(deliveries)
    }

    fn parse_raw_entry(entry: &Value) -> Option<Delivery> {
        let Value::Bulk(parts) = entry else {
            return None;
        };
        let stream_id = match parts.first()? {
            Value::Data(bytes) => String::from_utf8_lossy(bytes).to_string(),
            _ => return None,
        };
        let Value::Bulk(fields) = parts.get(1)? else {
            return None;
        };
        let mut envelope_json = None;
        for pair in fields.chunks(2) {
            if let [Value::Data(k), Value::Data(v)] = pair {
                if k.as_slice() == b"envelope" {
                    envelope_json = Some(String::from_utf8_lossy(v).to_string());
                }
            }
        }
        Self::entry_to_delivery(&stream_id, envelope_json.as_ref())
    }

    fn entry_to_delivery(stream_id: &str, envelope_json: Option<&String>) -> Option<Delivery> {
        let raw = envelope_json?;
        let envelope: Envelope = serde_json::from_str(raw).ok()?;
        Some(Delivery {
            stream_id: stream_id.to_string(),
            envelope,
        })
    }

    /// Acknowledge and delete a processed entry.
    pub async fn ack(&self, spec: &QueueSpec, stream_id: &str) -> Result<(), MqError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("XACK")
            .arg(spec.stream_key())
            .arg(&spec.group)
            .arg(stream_id)
            .query_async(&mut conn)
            .await?;
        let _: i64 = redis::cmd("XDEL")
            .arg(spec.stream_key())
            .arg(stream_id)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Schedule a retry: the envelope (attempt bumped, delay recorded) is
    /// parked in the retry set until `delay` elapses, then routed back to
    /// the main stream by the scheduler.
    pub async fn schedule_retry(
        &self,
        spec: &QueueSpec,
        envelope: &Envelope,
        delay: Duration,
    ) -> Result<(), MqError> {
        let retried = envelope.for_retry(delay);
        let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
        let member = serde_json::to_string(&retried)?;
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("ZADD")
            .arg(spec.retry_key())
            .arg(ready_at)
            .arg(member)
            .query_async(&mut conn)
            .await?;
        debug!(
            queue = %spec.name,
            message_id = %envelope.headers.message_id,
            attempt = retried.headers.retry_attempt,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );
        Ok(())
    }

    /// Terminal routing: append to the DLQ stream with `failure_reason`.
    pub async fn dead_letter(
        &self,
        spec: &QueueSpec,
        envelope: &Envelope,
        reason: &str,
    ) -> Result<(), MqError> {
        let dead = envelope.for_dead_letter(reason);
        self.xadd(&spec.dlq_key(), spec.max_length, &dead).await?;
        warn!(
            queue = %spec.name,
            message_id = %envelope.headers.message_id,
            reason,
            "Message dead-lettered"
        );
        Ok(())
    }

    /// Move due retry members back onto the main stream. Returns the number
    /// promoted. Re-publish happens before removal, so a crash in between
    /// duplicates rather than loses (consumers are idempotent).
    pub async fn promote_due(&self, spec: &QueueSpec, limit: usize) -> Result<usize, MqError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn.clone();
        let due: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(spec.retry_key())
            .arg("-inf")
            .arg(now)
            .arg("LIMIT")
            .arg(0)
            .arg(limit)
            .query_async(&mut conn)
            .await?;

        let mut promoted = 0;
        for member in due {
            match serde_json::from_str::<Envelope>(&member) {
                Ok(envelope) => {
                    self.xadd(&spec.stream_key(), spec.max_length, &envelope).await?;
                    promoted += 1;
                }
                Err(e) => {
                    warn!(queue = %spec.name, error = %e, "Dropping corrupt retry member");
                }
            }
            let _: i64 = redis::cmd("ZREM")
                .arg(spec.retry_key())
                .arg(&member)
                .query_async(&mut conn)
                .await?;
        }
        Ok(promoted)
    }

    /// Enforce queue TTLs by trimming entries older than the configured
    /// window (stream ids are millisecond timestamps).
    pub async fn trim_expired(&self, spec: &QueueSpec) -> Result<(), MqError> {
        let mut conn = self.conn.clone();
        let main_min = Utc::now().timestamp_millis() - spec.message_ttl.as_millis() as i64;
        let _: i64 = redis::cmd("XTRIM")
            .arg(spec.stream_key())
            .arg("MINID")
            .arg("~")
            .arg(main_min.max(0))
            .query_async(&mut conn)
            .await?;
        let dlq_min = Utc::now().timestamp_millis() - spec.dlq_ttl.as_millis() as i64;
        let _: i64 = redis::cmd("XTRIM")
            .arg(spec.dlq_key())
            .arg("MINID")
            .arg("~")
            .arg(dlq_min.max(0))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl QueuePublisher for RedisBroker {
    async fn publish(&self, queue: &str, envelope: &Envelope) -> Result<(), MqError> {
        let spec = self.spec_for(queue)?;
        self.xadd(&spec.stream_key(), spec.max_length, envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orders_ladder() {
        let spec = QueueSpec::orders();
        assert_eq!(spec.max_retries(), 4);
        assert_eq!(spec.delay_for_attempt(1), Some(Duration::from_secs(300)));
        assert_eq!(spec.delay_for_attempt(2), Some(Duration::from_secs(900)));
        assert_eq!(spec.delay_for_attempt(3), Some(Duration::from_secs(3600)));
        assert_eq!(spec.delay_for_attempt(4), Some(Duration::from_secs(21600)));
        assert_eq!(spec.delay_for_attempt(5), None);
        assert_eq!(spec.delay_for_attempt(0), None);
    }

    #[test]
    fn test_positions_ladder_is_faster() {
        let orders = QueueSpec::orders();
        let positions = QueueSpec::positions();
        assert_eq!(positions.delay_for_attempt(1), Some(Duration::from_secs(120)));
        for attempt in 1..=4 {
            assert!(
                positions.delay_for_attempt(attempt).unwrap()
                    < orders.delay_for_attempt(attempt).unwrap()
            );
        }
    }

    #[test]
    fn test_key_derivation() {
        let spec = QueueSpec::positions();
        assert_eq!(spec.stream_key(), "q:positions.updates");
        assert_eq!(spec.retry_key(), "q:positions.retry");
        assert_eq!(spec.dlq_key(), "q:positions.dlq");
    }
}
