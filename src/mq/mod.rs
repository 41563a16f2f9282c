//! Reliable messaging fabric.
//!
//! Durable queues over Redis Streams: consumer groups give ack semantics
//! and crashed-consumer recovery, a sorted set per queue implements the
//! TTL-based retry ladder, and a dead-letter stream terminates messages
//! that exhausted their retries.
//!
//! # Message flow
//!
//! ```text
//! outbox dispatcher → q:{name} → worker ── ok ──────────────→ XACK
//!                        ▲                └─ retryable err ──→ q:{name}:retry (zset, ready-at score)
//!                        │                └─ fatal err ──────→ q:{name}:dlq
//!                        └──────── retry scheduler (due) ─────┘
//! ```

pub mod broker;
pub mod envelope;
pub mod health;
pub mod retry;

pub use broker::{Delivery, QueuePublisher, QueueSpec, RedisBroker};
pub use envelope::{Envelope, MessageHeaders, OrderQueued, PositionUpdateMsg};
pub use health::{HealthMonitor, HealthState};

use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

/// Messaging fabric error.
#[derive(Debug, Error)]
pub enum MqError {
    /// Transport-level failure; always classified retryable.
    #[error("broker connection error: {0}")]
    Transport(String),

    #[error("message codec error: {0}")]
    Codec(String),
}

impl From<redis::RedisError> for MqError {
    fn from(e: redis::RedisError) -> Self {
        MqError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for MqError {
    fn from(e: serde_json::Error) -> Self {
        MqError::Codec(e.to_string())
    }
}

/// Worker-side failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Schedule on the retry ladder.
    Retryable,
    /// Straight to the dead-letter queue.
    NonRetryable,
}

/// Substrings that mark a failure as transient.
const RETRYABLE_MARKERS: &[&str] = &[
    "connection",
    "timeout",
    "timed out",
    "temporary",
    "network",
    "unavailable",
    "deadline exceeded",
];

/// Classify a failure message. The match is case-insensitive substring
/// search over the rendered error chain.
pub fn classify_failure(message: &str) -> ErrorClass {
    let lowered = message.to_lowercase();
    if RETRYABLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        ErrorClass::Retryable
    } else {
        ErrorClass::NonRetryable
    }
}

/// Per-key async lock table.
///
/// Serializes message handlers touching the same `(user_id, symbol)` while
/// unrelated keys proceed in parallel. Entries are never evicted; the key
/// space is bounded by the number of open positions a deployment handles.
#[derive(Clone, Default)]
pub struct KeyedLocks {
    locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, creating it on first use.
    pub async fn lock(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_markers() {
        assert_eq!(
            classify_failure("market data deadline exceeded"),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify_failure("Connection refused (os error 111)"),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify_failure("temporary conflict: concurrent position update"),
            ErrorClass::Retryable
        );
        assert_eq!(
            classify_failure("no open position for user"),
            ErrorClass::NonRetryable
        );
        assert_eq!(classify_failure("validation: quantity must be > 0"), ErrorClass::NonRetryable);
    }

    #[tokio::test]
    async fn test_keyed_locks_serialize_same_key() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("u1:AAPL").await;

        // Same key: second acquisition must wait.
        let locks2 = locks.clone();
        let pending = tokio::spawn(async move { locks2.lock("u1:AAPL").await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!pending.is_finished());

        // Different key proceeds immediately.
        let _other = locks.lock("u1:MSFT").await;

        drop(guard);
        pending.await.unwrap();
    }
}
