//! Market-data repositories: direct PostgreSQL variant and the cache-aside
//! decorator.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::models::MarketDataEntry;
use super::{MarketDataError, MarketDataSource};
use crate::cache::CacheGateway;

/// Direct variant: reads the `instruments` primary store.
pub struct PgMarketDataRepository {
    pool: PgPool,
}

impl PgMarketDataRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketDataSource for PgMarketDataRepository {
    async fn get(&self, symbols: &[String]) -> Result<Vec<MarketDataEntry>, MarketDataError> {
        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT symbol, name, category, last_quote, updated_at
            FROM instruments
            WHERE symbol = ANY($1)
            "#,
        )
        .bind(symbols)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| MarketDataEntry {
                symbol: row.get("symbol"),
                name: row.get("name"),
                category: row.get("category"),
                last_quote: row.get("last_quote"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }
}

/// Cache-aside decorator over another source.
///
/// Per-symbol keys (`md:{symbol}`) with a configurable TTL. A cache outage
/// turns every read into a pass-through to the inner source.
pub struct CachedMarketData {
    inner: Arc<dyn MarketDataSource>,
    cache: CacheGateway,
    ttl: Duration,
}

impl CachedMarketData {
    pub fn new(inner: Arc<dyn MarketDataSource>, cache: CacheGateway, ttl: Duration) -> Self {
        Self { inner, cache, ttl }
    }

    fn key(symbol: &str) -> String {
        format!("md:{symbol}")
    }

    /// Drop cached entries for the given symbols (admin surface).
    pub async fn invalidate(&self, symbols: &[String]) {
        let keys: Vec<String> = symbols.iter().map(|s| Self::key(s)).collect();
        self.cache.del(&keys).await;
        info!(count = symbols.len(), "Market-data cache invalidated");
    }

    /// Pre-load the cache for the given symbols (admin surface). Returns
    /// the number of entries warmed.
    pub async fn warm(&self, symbols: &[String]) -> Result<usize, MarketDataError> {
        let entries = self.inner.get(symbols).await?;
        for entry in &entries {
            self.cache.set_json(&Self::key(&entry.symbol), entry, self.ttl).await;
        }
        info!(requested = symbols.len(), warmed = entries.len(), "Market-data cache warmed");
        Ok(entries.len())
    }
}

#[async_trait]
impl MarketDataSource for CachedMarketData {
    async fn get(&self, symbols: &[String]) -> Result<Vec<MarketDataEntry>, MarketDataError> {
        let mut hits = Vec::with_capacity(symbols.len());
        let mut misses = Vec::new();

        for symbol in symbols {
            match self.cache.get_json::<MarketDataEntry>(&Self::key(symbol)).await {
                Some(entry) => hits.push(entry),
                None => misses.push(symbol.clone()),
            }
        }

        if !misses.is_empty() {
            debug!(misses = misses.len(), "Market-data cache misses, hitting primary");
            let fetched = self.inner.get(&misses).await?;
            for entry in &fetched {
                self.cache.set_json(&Self::key(&entry.symbol), entry, self.ttl).await;
            }
            hits.extend(fetched);
        }

        Ok(hits)
    }
}
