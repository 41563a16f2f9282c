//! Position persistence: store capability + PostgreSQL implementation.
//!
//! The PG implementation owns `positions` rows exclusively; all mutation
//! goes through the optimistic `update_cas` so concurrent workers never
//! clobber each other.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::error::PositionError;
use super::model::{Position, PositionStatus, PositionType};

#[async_trait]
pub trait PositionStore: Send + Sync {
    /// The single ACTIVE/PARTIAL row for `(user, symbol)`, if any.
    async fn find_open(&self, user_id: Uuid, symbol: &str)
        -> Result<Option<Position>, PositionError>;

    /// Whether a source order's update has already been applied. Paired
    /// with the applied-marker writes below, this makes duplicate message
    /// delivery a no-op under the per-key serialization guarantee.
    async fn is_applied(&self, order_id: Uuid) -> Result<bool, PositionError>;

    /// Insert a freshly opened position, recording the source order as
    /// applied in the same transaction. `Conflict` when a concurrent
    /// create won the unique `(user, symbol)` open-row index.
    async fn insert(
        &self,
        position: &Position,
        source_order: Option<Uuid>,
    ) -> Result<(), PositionError>;

    /// Optimistic update: applies the aggregate only when the stored
    /// `updated_at` still equals `prev_updated_at`. The source order is
    /// marked applied in the same transaction.
    async fn update_cas(
        &self,
        position: &Position,
        prev_updated_at: DateTime<Utc>,
        source_order: Option<Uuid>,
    ) -> Result<bool, PositionError>;

    async fn list_open(&self, user_id: Uuid) -> Result<Vec<Position>, PositionError>;

    async fn count_open(&self, user_id: Uuid) -> Result<i64, PositionError>;
}

pub struct PgPositionStore {
    pool: PgPool,
}

impl PgPositionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_position(row: &PgRow) -> Result<Position, PositionError> {
        let status_raw: String = row.get("status");
        let status = PositionStatus::parse(&status_raw)
            .ok_or_else(|| PositionError::Store(format!("invalid status in row: {status_raw}")))?;
        let type_raw: String = row.get("position_type");
        let position_type = PositionType::parse(&type_raw)
            .ok_or_else(|| PositionError::Store(format!("invalid type in row: {type_raw}")))?;

        Ok(Position {
            id: row.get("id"),
            user_id: row.get("user_id"),
            symbol: row.get("symbol"),
            quantity: row.get("quantity"),
            average_price: row.get("average_price"),
            total_investment: row.get("total_investment"),
            current_price: row.get("current_price"),
            market_value: row.get("market_value"),
            unrealized_pnl: row.get("unrealized_pnl"),
            unrealized_pnl_pct: row.get("unrealized_pnl_pct"),
            position_type,
            status,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            last_trade_at: row.get("last_trade_at"),
        })
    }

    async fn mark_applied_in_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        source_order: Option<Uuid>,
    ) -> Result<(), PositionError> {
        if let Some(order_id) = source_order {
            sqlx::query(
                "INSERT INTO position_applied (order_id) VALUES ($1) ON CONFLICT DO NOTHING",
            )
            .bind(order_id)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

const SELECT_POSITION: &str = r#"
SELECT id, user_id, symbol, quantity, average_price, total_investment,
       current_price, market_value, unrealized_pnl, unrealized_pnl_pct,
       position_type, status, created_at, updated_at, last_trade_at
FROM positions
"#;

#[async_trait]
impl PositionStore for PgPositionStore {
    async fn find_open(
        &self,
        user_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Position>, PositionError> {
        let row = sqlx::query(&format!(
            "{SELECT_POSITION} WHERE user_id = $1 AND symbol = $2 AND status IN ('ACTIVE', 'PARTIAL')"
        ))
        .bind(user_id)
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::row_to_position(&r)).transpose()
    }

    async fn is_applied(&self, order_id: Uuid) -> Result<bool, PositionError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM position_applied WHERE order_id = $1)")
                .bind(order_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn insert(
        &self,
        position: &Position,
        source_order: Option<Uuid>,
    ) -> Result<(), PositionError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO positions
                (id, user_id, symbol, quantity, average_price, total_investment,
                 current_price, market_value, unrealized_pnl, unrealized_pnl_pct,
                 position_type, status, created_at, updated_at, last_trade_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(position.id)
        .bind(position.user_id)
        .bind(&position.symbol)
        .bind(position.quantity)
        .bind(position.average_price)
        .bind(position.total_investment)
        .bind(position.current_price)
        .bind(position.market_value)
        .bind(position.unrealized_pnl)
        .bind(position.unrealized_pnl_pct)
        .bind(position.position_type.as_str())
        .bind(position.status.as_str())
        .bind(position.created_at)
        .bind(position.updated_at)
        .bind(position.last_trade_at)
        .execute(&mut *tx)
        .await?;
        Self::mark_applied_in_tx(&mut tx, source_order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_cas(
        &self,
        position: &Position,
        prev_updated_at: DateTime<Utc>,
        source_order: Option<Uuid>,
    ) -> Result<bool, PositionError> {
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE positions
            SET quantity = $1, average_price = $2, total_investment = $3,
                current_price = $4, market_value = $5, unrealized_pnl = $6,
                unrealized_pnl_pct = $7, status = $8, updated_at = $9,
                last_trade_at = $10
            WHERE id = $11 AND updated_at = $12
            "#,
        )
        .bind(position.quantity)
        .bind(position.average_price)
        .bind(position.total_investment)
        .bind(position.current_price)
        .bind(position.market_value)
        .bind(position.unrealized_pnl)
        .bind(position.unrealized_pnl_pct)
        .bind(position.status.as_str())
        .bind(position.updated_at)
        .bind(position.last_trade_at)
        .bind(position.id)
        .bind(prev_updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }
        Self::mark_applied_in_tx(&mut tx, source_order).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn list_open(&self, user_id: Uuid) -> Result<Vec<Position>, PositionError> {
        let rows = sqlx::query(&format!(
            "{SELECT_POSITION} WHERE user_id = $1 AND status IN ('ACTIVE', 'PARTIAL') ORDER BY symbol"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_position).collect()
    }

    async fn count_open(&self, user_id: Uuid) -> Result<i64, PositionError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM positions WHERE user_id = $1 AND status IN ('ACTIVE', 'PARTIAL')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
