//! Position domain events.
//!
//! Emitted on save and drained by the use case; the aggregate row never
//! carries them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::model::{Position, PositionStatus};
use crate::order::model::OrderSide;

/// Compact before/after view used in `PositionUpdated`.
#[derive(Debug, Clone, Serialize)]
pub struct PositionSnapshot {
    pub quantity: Decimal,
    pub average_price: Decimal,
    pub total_investment: Decimal,
    pub status: PositionStatus,
}

impl From<&Position> for PositionSnapshot {
    fn from(p: &Position) -> Self {
        Self {
            quantity: p.quantity,
            average_price: p.average_price,
            total_investment: p.total_investment,
            status: p.status,
        }
    }
}

/// The trade that caused an update.
#[derive(Debug, Clone, Serialize)]
pub struct TradeTransaction {
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PositionEvent {
    PositionCreated {
        position_id: Uuid,
        user_id: Uuid,
        symbol: String,
        quantity: Decimal,
        average_price: Decimal,
        source_order_id: Option<Uuid>,
    },
    PositionUpdated {
        position_id: Uuid,
        user_id: Uuid,
        symbol: String,
        before: PositionSnapshot,
        after: PositionSnapshot,
        transaction: TradeTransaction,
        source_order_id: Option<Uuid>,
    },
    PositionClosed {
        position_id: Uuid,
        user_id: Uuid,
        symbol: String,
        holding_period_secs: i64,
        realized_pnl: Decimal,
        source_order_id: Option<Uuid>,
    },
    PositionPriceUpdated {
        position_id: Uuid,
        symbol: String,
        old_price: Option<Decimal>,
        new_price: Decimal,
        at: DateTime<Utc>,
    },
    PositionValidationFailed {
        user_id: Uuid,
        symbol: String,
        reason: String,
    },
}

impl PositionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PositionEvent::PositionCreated { .. } => "position_created",
            PositionEvent::PositionUpdated { .. } => "position_updated",
            PositionEvent::PositionClosed { .. } => "position_closed",
            PositionEvent::PositionPriceUpdated { .. } => "position_price_updated",
            PositionEvent::PositionValidationFailed { .. } => "position_validation_failed",
        }
    }
}
