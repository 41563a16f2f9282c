//! Cache gateway: thin Redis wrapper with graceful degradation.
//!
//! Every operation is best-effort: an unreachable cache downgrades reads to
//! a miss and writes to a no-op, with a warning. Callers never see a cache
//! error cross this boundary.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CacheGateway {
    conn: ConnectionManager,
}

impl CacheGateway {
    /// Connect to Redis. The connection manager reconnects on its own after
    /// an outage; individual commands during the outage degrade.
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!("Redis cache connection established");
        Ok(Self { conn })
    }

    /// Fetch and deserialize a cached value. Returns `None` on miss,
    /// corrupt payload, or cache outage.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = match conn.get(key).await {
            Ok(v) => v,
            Err(e) => {
                warn!(key, error = %e, "Cache read failed, degrading to miss");
                return None;
            }
        };
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(v) => Some(v),
            Err(e) => {
                debug!(key, error = %e, "Corrupt cache entry, treating as miss");
                None
            }
        }
    }

    /// Store a value with a TTL. Failures are logged and swallowed.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        let payload = match serde_json::to_string(value) {
            Ok(p) => p,
            Err(e) => {
                warn!(key, error = %e, "Failed to serialize cache value");
                return;
            }
        };
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> =
            conn.set_ex(key, payload, ttl.as_secs().max(1)).await;
        if let Err(e) = result {
            warn!(key, error = %e, "Cache write failed");
        }
    }

    /// Delete keys. Failures are logged and swallowed.
    pub async fn del(&self, keys: &[String]) {
        if keys.is_empty() {
            return;
        }
        let mut conn = self.conn.clone();
        let result: Result<(), redis::RedisError> = conn.del(keys).await;
        if let Err(e) = result {
            warn!(?keys, error = %e, "Cache delete failed");
        }
    }
}
