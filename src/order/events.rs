//! Order domain events, emitted by use cases at state transitions.
//!
//! Events live in a side-channel returned from the use case; nothing here
//! is persisted on the aggregate row.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::model::{OrderSide, OrderType};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    OrderSubmitted {
        order_id: Uuid,
        user_id: Uuid,
        symbol: String,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
    },
    OrderExecuted {
        order_id: Uuid,
        execution_price: Decimal,
        executed_at: DateTime<Utc>,
    },
    OrderFailed {
        order_id: Uuid,
        reason: String,
    },
    OrderCancelled {
        order_id: Uuid,
    },
}

impl OrderEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderEvent::OrderSubmitted { order_id, .. }
            | OrderEvent::OrderExecuted { order_id, .. }
            | OrderEvent::OrderFailed { order_id, .. }
            | OrderEvent::OrderCancelled { order_id } => *order_id,
        }
    }
}
