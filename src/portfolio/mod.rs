//! Portfolio read paths: balance, category aggregation, summary,
//! watchlist. These bypass the queue fabric and read the stores directly.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::market_data::{MarketDataEntry, MarketDataError, MarketDataSource};
use crate::position::error::PositionError;
use crate::position::model::Position;
use crate::position::service::PositionService;
use crate::position::store::PositionStore;

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("storage error: {0}")]
    Store(String),

    #[error("market data unavailable: {0}")]
    MarketData(String),
}

impl From<sqlx::Error> for PortfolioError {
    fn from(e: sqlx::Error) -> Self {
        PortfolioError::Store(e.to_string())
    }
}

impl From<PositionError> for PortfolioError {
    fn from(e: PositionError) -> Self {
        PortfolioError::Store(e.to_string())
    }
}

impl From<MarketDataError> for PortfolioError {
    fn from(e: MarketDataError) -> Self {
        PortfolioError::MarketData(e.to_string())
    }
}

/// One open position in an aggregation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionView {
    pub symbol: String,
    pub name: Option<String>,
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub total_investment: Decimal,
    pub current_price: Option<Decimal>,
    pub market_value: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub unrealized_pnl_pct: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAggregation {
    pub category: String,
    pub total_investment: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub positions: Vec<PositionView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortfolioSummary {
    #[serde(rename = "totalPortfolioValue")]
    pub total_portfolio_value: Decimal,
    pub balance: Decimal,
    #[serde(rename = "positionAggregation")]
    pub position_aggregation: Vec<CategoryAggregation>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

pub struct PortfolioService {
    pool: PgPool,
    positions: Arc<dyn PositionStore>,
    position_service: Arc<PositionService>,
    market_data: Arc<dyn MarketDataSource>,
}

impl PortfolioService {
    pub fn new(
        pool: PgPool,
        positions: Arc<dyn PositionStore>,
        position_service: Arc<PositionService>,
        market_data: Arc<dyn MarketDataSource>,
    ) -> Self {
        Self {
            pool,
            positions,
            position_service,
            market_data,
        }
    }

    pub async fn available_balance(&self, user_id: Uuid) -> Result<Decimal, PortfolioError> {
        let available: Option<Decimal> =
            sqlx::query_scalar("SELECT available FROM balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(available.unwrap_or(Decimal::ZERO))
    }

    pub async fn list_positions(&self, user_id: Uuid) -> Result<Vec<Position>, PortfolioError> {
        Ok(self.positions.list_open(user_id).await?)
    }

    /// Open positions grouped by instrument category, with per-category
    /// totals. Refreshes each position's market snapshot on the way
    /// through (best effort; a stale snapshot beats a failed read).
    pub async fn aggregation(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<CategoryAggregation>, PortfolioError> {
        let positions = self.positions.list_open(user_id).await?;
        if positions.is_empty() {
            return Ok(Vec::new());
        }

        let symbols: Vec<String> = positions.iter().map(|p| p.symbol.clone()).collect();
        let entries: HashMap<String, MarketDataEntry> = self
            .market_data
            .get(&symbols)
            .await?
            .into_iter()
            .map(|e| (e.symbol.clone(), e))
            .collect();

        let mut grouped: HashMap<String, CategoryAggregation> = HashMap::new();
        for position in positions {
            let entry = entries.get(&position.symbol);
            if let Some(entry) = entry {
                // Keep the stored snapshot warm; a CAS loss here just means
                // a trade got there first.
                if let Err(e) = self
                    .position_service
                    .mark_price(user_id, &position.symbol, entry.last_quote)
                    .await
                {
                    debug!(symbol = %position.symbol, error = %e, "price mark skipped");
                }
            }

            let current_price = entry.map(|e| e.last_quote).or(position.current_price);
            let market_value = current_price.map(|px| position.quantity * px);
            let unrealized = current_price
                .map(|px| (px - position.average_price) * position.quantity);

            let category = entry
                .map(|e| e.category.clone())
                .unwrap_or_else(|| "UNKNOWN".to_string());

            let bucket = grouped
                .entry(category.clone())
                .or_insert_with(|| CategoryAggregation {
                    category,
                    total_investment: Decimal::ZERO,
                    market_value: Decimal::ZERO,
                    unrealized_pnl: Decimal::ZERO,
                    positions: Vec::new(),
                });

            bucket.total_investment += position.total_investment;
            bucket.market_value += market_value.unwrap_or(position.total_investment);
            bucket.unrealized_pnl += unrealized.unwrap_or(Decimal::ZERO);
            bucket.positions.push(PositionView {
                symbol: position.symbol.clone(),
                name: entry.map(|e| e.name.clone()),
                quantity: position.quantity,
                average_price: position.average_price,
                total_investment: position.total_investment,
                current_price,
                market_value,
                unrealized_pnl: unrealized,
                unrealized_pnl_pct: match (unrealized, position.total_investment) {
                    (Some(pnl), ti) if !ti.is_zero() => {
                        Some(pnl / ti * Decimal::ONE_HUNDRED)
                    }
                    _ => None,
                },
            });
        }

        let mut aggregations: Vec<CategoryAggregation> = grouped.into_values().collect();
        aggregations.sort_by(|a, b| a.category.cmp(&b.category));
        Ok(aggregations)
    }

    pub async fn summary(&self, user_id: Uuid) -> Result<PortfolioSummary, PortfolioError> {
        let balance = self.available_balance(user_id).await?;
        let aggregation = self.aggregation(user_id).await?;
        let holdings: Decimal = aggregation.iter().map(|a| a.market_value).sum();
        Ok(PortfolioSummary {
            total_portfolio_value: balance + holdings,
            balance,
            position_aggregation: aggregation,
            last_updated: Utc::now(),
        })
    }

    pub async fn watchlist(&self, user_id: Uuid) -> Result<Vec<MarketDataEntry>, PortfolioError> {
        let symbols: Vec<String> = sqlx::query(
            "SELECT symbol FROM watchlists WHERE user_id = $1 ORDER BY added_at",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(|row| row.get("symbol"))
        .collect();

        if symbols.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.market_data.get(&symbols).await?)
    }
}
