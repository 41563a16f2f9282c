//! Balance store: cash available for buying-power checks.
//!
//! Reads only. Cash movement happens inside the order-finalize transaction
//! so execution and balance never diverge.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone)]
pub enum BalanceError {
    #[error("storage error: {0}")]
    Store(String),
}

impl From<sqlx::Error> for BalanceError {
    fn from(e: sqlx::Error) -> Self {
        BalanceError::Store(e.to_string())
    }
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Available cash; users without a row hold zero.
    async fn available(&self, user_id: Uuid) -> Result<Decimal, BalanceError>;
}

pub struct PgBalanceStore {
    pool: PgPool,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn available(&self, user_id: Uuid) -> Result<Decimal, BalanceError> {
        let row: Option<Decimal> =
            sqlx::query_scalar("SELECT available FROM balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.unwrap_or(Decimal::ZERO))
    }
}
