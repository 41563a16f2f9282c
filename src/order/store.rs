//! Order persistence: store capability + PostgreSQL implementation.
//!
//! The PG implementation is the exclusive owner of `orders` rows. All
//! status transitions are compare-and-set on `status`, and every write that
//! must reach the broker stages its message in the outbox inside the same
//! transaction.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::error::OrderError;
use super::model::{Order, OrderSide, OrderStatus, OrderType};
use crate::outbox::{self, NewOutboxMessage};

/// Terminal write produced by the process-order use case.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// `Executed` or `Failed`.
    pub status: OrderStatus,
    pub execution_price: Option<Decimal>,
    pub executed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

impl ExecutionOutcome {
    pub fn executed(price: Decimal, at: DateTime<Utc>) -> Self {
        Self {
            status: OrderStatus::Executed,
            execution_price: Some(price),
            executed_at: Some(at),
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: OrderStatus::Failed,
            execution_price: None,
            executed_at: None,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Order-history query filter.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub status: Option<OrderStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Store capability for the order aggregate.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a PENDING order and stage its processing message atomically.
    async fn insert_pending(
        &self,
        order: &Order,
        outbox: NewOutboxMessage,
    ) -> Result<(), OrderError>;

    async fn find(&self, id: Uuid) -> Result<Option<Order>, OrderError>;

    /// Recent order with the same idempotency key, if any.
    async fn find_by_idempotency(
        &self,
        user_id: Uuid,
        key: &str,
        window: Duration,
    ) -> Result<Option<Order>, OrderError>;

    /// CAS `PENDING → PROCESSING`; false when the row moved on.
    async fn begin_processing(&self, id: Uuid) -> Result<bool, OrderError>;

    /// CAS `PROCESSING → EXECUTED|FAILED` plus optional cash movement and
    /// staged position-update message, all in one transaction. Returns
    /// false when the CAS missed (nothing was written).
    async fn finalize(
        &self,
        id: Uuid,
        outcome: &ExecutionOutcome,
        cash_delta: Option<(Uuid, Decimal)>,
        outbox: Option<NewOutboxMessage>,
    ) -> Result<bool, OrderError>;

    /// CAS `PENDING → CANCELLED`; false when the row moved on.
    async fn cancel(&self, id: Uuid) -> Result<bool, OrderError>;

    /// Dead-letter cleanup: force a non-terminal row to FAILED with the
    /// terminal reason. False when the row is already terminal.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, OrderError>;

    async fn history(&self, user_id: Uuid, filter: &HistoryFilter)
        -> Result<Vec<Order>, OrderError>;
}

pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_order(row: &PgRow) -> Result<Order, OrderError> {
        let side_raw: String = row.get("side");
        let side = OrderSide::parse(&side_raw)
            .ok_or_else(|| OrderError::Internal(format!("invalid side in row: {side_raw}")))?;
        let type_raw: String = row.get("order_type");
        let order_type = OrderType::parse(&type_raw)
            .ok_or_else(|| OrderError::Internal(format!("invalid order type in row: {type_raw}")))?;
        let status_raw: String = row.get("status");
        let status = OrderStatus::parse(&status_raw)
            .ok_or_else(|| OrderError::Internal(format!("invalid status in row: {status_raw}")))?;

        Ok(Order {
            id: row.get("id"),
            user_id: row.get("user_id"),
            symbol: row.get("symbol"),
            side,
            order_type,
            quantity: row.get("quantity"),
            price: row.get("price"),
            status,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            executed_at: row.get("executed_at"),
            execution_price: row.get("execution_price"),
            market_price_at_submission: row.get("market_price_at_submission"),
            failure_reason: row.get("failure_reason"),
            idempotency_key: row.get("idempotency_key"),
        })
    }
}

const SELECT_ORDER: &str = r#"
SELECT id, user_id, symbol, side, order_type, quantity, price, status,
       created_at, updated_at, executed_at, execution_price,
       market_price_at_submission, failure_reason, idempotency_key
FROM orders
"#;

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn insert_pending(
        &self,
        order: &Order,
        outbox_msg: NewOutboxMessage,
    ) -> Result<(), OrderError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders
                (id, user_id, symbol, side, order_type, quantity, price, status,
                 created_at, updated_at, market_price_at_submission, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.order_type.as_str())
        .bind(order.quantity)
        .bind(order.price)
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.market_price_at_submission)
        .bind(&order.idempotency_key)
        .execute(&mut *tx)
        .await?;

        outbox::insert_in_tx(&mut tx, &outbox_msg).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>, OrderError> {
        let row = sqlx::query(&format!("{SELECT_ORDER} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::row_to_order(&r)).transpose()
    }

    async fn find_by_idempotency(
        &self,
        user_id: Uuid,
        key: &str,
        window: Duration,
    ) -> Result<Option<Order>, OrderError> {
        let since =
            Utc::now() - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());
        let row = sqlx::query(&format!(
            "{SELECT_ORDER} WHERE user_id = $1 AND idempotency_key = $2 AND created_at >= $3"
        ))
        .bind(user_id)
        .bind(key)
        .bind(since)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| Self::row_to_order(&r)).transpose()
    }

    async fn begin_processing(&self, id: Uuid) -> Result<bool, OrderError> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'PROCESSING', updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finalize(
        &self,
        id: Uuid,
        outcome: &ExecutionOutcome,
        cash_delta: Option<(Uuid, Decimal)>,
        outbox_msg: Option<NewOutboxMessage>,
    ) -> Result<bool, OrderError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, execution_price = $2, executed_at = $3,
                failure_reason = $4, updated_at = NOW()
            WHERE id = $5 AND status = 'PROCESSING'
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(outcome.execution_price)
        .bind(outcome.executed_at)
        .bind(&outcome.failure_reason)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if let Some((user_id, delta)) = cash_delta {
            sqlx::query(
                r#"
                INSERT INTO balances (user_id, available, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (user_id)
                DO UPDATE SET available = balances.available + $2, updated_at = NOW()
                "#,
            )
            .bind(user_id)
            .bind(delta)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(msg) = outbox_msg {
            outbox::insert_in_tx(&mut tx, &msg).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, OrderError> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'CANCELLED', updated_at = NOW()
             WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, OrderError> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'FAILED', failure_reason = $1, updated_at = NOW()
             WHERE id = $2 AND status IN ('PENDING', 'PROCESSING')",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn history(
        &self,
        user_id: Uuid,
        filter: &HistoryFilter,
    ) -> Result<Vec<Order>, OrderError> {
        let limit = if filter.limit <= 0 { 50 } else { filter.limit.min(500) };
        let rows = sqlx::query(&format!(
            r#"{SELECT_ORDER}
            WHERE user_id = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at <= $4)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(user_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.from)
        .bind(filter.to)
        .bind(limit)
        .bind(filter.offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_order).collect()
    }
}
