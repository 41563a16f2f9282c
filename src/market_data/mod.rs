//! Market-data client: symbol validation and current prices.
//!
//! The repository is a capability with two variants, direct (primary
//! store) and cached (cache-aside decorator), composed at boot. Cache
//! failures never cross the boundary; reads degrade to the primary store.

pub mod models;
pub mod repository;

pub use models::MarketDataEntry;
pub use repository::{CachedMarketData, PgMarketDataRepository};

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum MarketDataError {
    #[error("unknown symbol: {0}")]
    SymbolUnknown(String),

    /// Transient store failure; wording keeps the retryable markers
    /// visible to the worker-side classifier.
    #[error("market data unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for MarketDataError {
    fn from(e: sqlx::Error) -> Self {
        MarketDataError::Unavailable(e.to_string())
    }
}

/// Read capability over market-data snapshots.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Snapshot entries for the requested symbols. Unknown symbols are
    /// simply absent from the result.
    async fn get(&self, symbols: &[String]) -> Result<Vec<MarketDataEntry>, MarketDataError>;

    /// Single-symbol lookup; `SymbolUnknown` when absent.
    async fn get_one(&self, symbol: &str) -> Result<MarketDataEntry, MarketDataError> {
        let entries = self.get(std::slice::from_ref(&symbol.to_string())).await?;
        entries
            .into_iter()
            .find(|e| e.symbol == symbol)
            .ok_or_else(|| MarketDataError::SymbolUnknown(symbol.to_string()))
    }

    /// Current price for a symbol.
    async fn current_price(&self, symbol: &str) -> Result<Decimal, MarketDataError> {
        Ok(self.get_one(symbol).await?.last_quote)
    }
}
