//! Message envelope: JSON body plus a typed metadata record.
//!
//! Headers travel with the message across retries and into the DLQ, so the
//! retry ladder is observable from the outside (`retry_attempt`, `ttl_ms`,
//! `original_queue`, `failure_reason`).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use uuid::Uuid;

use super::MqError;
use crate::order::model::OrderSide;

/// Well-known message types.
pub mod message_types {
    pub const ORDER_PROCESS: &str = "order.process";
    pub const POSITION_UPDATE: &str = "position.update";
}

/// Typed message metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeaders {
    pub message_id: Uuid,
    /// Ties all messages spawned by one order together.
    pub correlation_id: Uuid,
    /// 0 on first delivery, incremented per retry.
    pub retry_attempt: u32,
    pub original_queue: String,
    pub message_type: String,
    pub timestamp: DateTime<Utc>,
    /// Delay applied before the current delivery, if this is a retry.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ttl_ms: Option<u64>,
    /// 1 (lowest) ..= 7 (highest).
    pub priority: u8,
    /// Set when the message is dead-lettered.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_reason: Option<String>,
}

/// A message: headers + JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub headers: MessageHeaders,
    pub body: serde_json::Value,
}

impl Envelope {
    pub fn new(
        queue: &str,
        message_type: &str,
        priority: u8,
        correlation_id: Uuid,
        body: serde_json::Value,
    ) -> Self {
        Self {
            headers: MessageHeaders {
                message_id: Uuid::new_v4(),
                correlation_id,
                retry_attempt: 0,
                original_queue: queue.to_string(),
                message_type: message_type.to_string(),
                timestamp: Utc::now(),
                ttl_ms: None,
                priority: priority.clamp(1, 7),
                failure_reason: None,
            },
            body,
        }
    }

    /// Derive the next-retry envelope: bumps `retry_attempt`, records the
    /// applied delay, keeps identity headers intact.
    pub fn for_retry(&self, delay: std::time::Duration) -> Self {
        let mut next = self.clone();
        next.headers.retry_attempt += 1;
        next.headers.ttl_ms = Some(delay.as_millis() as u64);
        next
    }

    /// Derive the dead-letter envelope with the terminal failure reason.
    pub fn for_dead_letter(&self, reason: &str) -> Self {
        let mut dead = self.clone();
        dead.headers.priority = 1;
        dead.headers.failure_reason = Some(reason.to_string());
        dead
    }

    /// Decode the body into a typed payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MqError> {
        serde_json::from_value(self.body.clone()).map_err(MqError::from)
    }
}

/// Payload on `orders.processing`: the worker loads the aggregate by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderQueued {
    pub order_id: Uuid,
}

/// Payload on `positions.updates`, emitted when an order executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionUpdateMsg {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub execution_price: Decimal,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample() -> Envelope {
        Envelope::new(
            "orders.processing",
            message_types::ORDER_PROCESS,
            7,
            Uuid::new_v4(),
            serde_json::json!({"order_id": Uuid::new_v4()}),
        )
    }

    #[test]
    fn test_retry_derivation_preserves_identity() {
        let env = sample();
        let retried = env.for_retry(Duration::from_secs(300));
        assert_eq!(retried.headers.message_id, env.headers.message_id);
        assert_eq!(retried.headers.correlation_id, env.headers.correlation_id);
        assert_eq!(retried.headers.retry_attempt, 1);
        assert_eq!(retried.headers.ttl_ms, Some(300_000));
        assert_eq!(retried.headers.original_queue, "orders.processing");

        let again = retried.for_retry(Duration::from_secs(900));
        assert_eq!(again.headers.retry_attempt, 2);
        assert_eq!(again.headers.ttl_ms, Some(900_000));
    }

    #[test]
    fn test_dead_letter_carries_reason() {
        let dead = sample().for_dead_letter("market data timeout");
        assert_eq!(dead.headers.failure_reason.as_deref(), Some("market data timeout"));
        assert_eq!(dead.headers.priority, 1);
    }

    #[test]
    fn test_priority_clamped() {
        let env = Envelope::new("q", "t", 99, Uuid::new_v4(), serde_json::Value::Null);
        assert_eq!(env.headers.priority, 7);
        let env = Envelope::new("q", "t", 0, Uuid::new_v4(), serde_json::Value::Null);
        assert_eq!(env.headers.priority, 1);
    }
}
