//! Order aggregate and status machine.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::OrderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(OrderSide::Buy),
            "SELL" => Some(OrderSide::Sell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    StopLoss,
    StopLimit,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopLoss => "STOP_LOSS",
            OrderType::StopLimit => "STOP_LIMIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(OrderType::Market),
            "LIMIT" => Some(OrderType::Limit),
            "STOP_LOSS" => Some(OrderType::StopLoss),
            "STOP_LIMIT" => Some(OrderType::StopLimit),
            _ => None,
        }
    }

    /// LIMIT and STOP variants carry a caller-supplied price.
    pub fn requires_price(&self) -> bool {
        !matches!(self, OrderType::Market)
    }

    /// Queue priority: MARKET > LIMIT > STOP.
    pub fn priority(&self) -> u8 {
        match self {
            OrderType::Market => 7,
            OrderType::Limit => 5,
            OrderType::StopLoss | OrderType::StopLimit => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Processing,
    Executed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Executed => "EXECUTED",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OrderStatus::Pending),
            "PROCESSING" => Some(OrderStatus::Processing),
            "EXECUTED" => Some(OrderStatus::Executed),
            "FAILED" => Some(OrderStatus::Failed),
            "CANCELLED" => Some(OrderStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Executed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    /// Allowed edges of the status machine.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Processing)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
                | (OrderStatus::Processing, OrderStatus::Executed)
                | (OrderStatus::Processing, OrderStatus::Failed)
        )
    }
}

/// The order aggregate. One row, owned by the order repository; the submit
/// use case is the only creator and the worker the only writer past
/// PENDING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_price: Option<Decimal>,
    pub market_price_at_submission: Option<Decimal>,
    pub failure_reason: Option<String>,
    pub idempotency_key: Option<String>,
}

impl Order {
    /// Build a PENDING order from a validated command.
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        user_id: Uuid,
        symbol: String,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        market_price: Decimal,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            symbol,
            side,
            order_type,
            quantity,
            price,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
            executed_at: None,
            execution_price: None,
            market_price_at_submission: Some(market_price),
            failure_reason: None,
            idempotency_key,
        }
    }

    /// Structural invariants: positive quantity, price present and positive
    /// where the type demands one.
    pub fn validate_shape(
        symbol: &str,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
    ) -> Result<(), OrderError> {
        if symbol.trim().is_empty() || symbol.len() > 12 {
            return Err(OrderError::Validation("symbol must be 1-12 characters".into()));
        }
        if quantity <= Decimal::ZERO {
            return Err(OrderError::Validation("quantity must be greater than zero".into()));
        }
        match price {
            Some(p) if p <= Decimal::ZERO => {
                return Err(OrderError::Validation("price must be greater than zero".into()));
            }
            None if order_type.requires_price() => {
                return Err(OrderError::Validation(format!(
                    "price is required for {} orders",
                    order_type.as_str()
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_machine_edges() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Processing.can_transition_to(Executed));
        assert!(Processing.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Executed));
        assert!(!Processing.can_transition_to(Cancelled));
        for terminal in [Executed, Failed, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Processing, Executed, Failed, Cancelled] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_shape_validation() {
        assert!(Order::validate_shape("AAPL", OrderType::Market, dec!(10), None).is_ok());
        assert!(Order::validate_shape("AAPL", OrderType::Limit, dec!(10), Some(dec!(150))).is_ok());

        // LIMIT without a price
        assert!(Order::validate_shape("AAPL", OrderType::Limit, dec!(10), None).is_err());
        // stop variants need a price too
        assert!(Order::validate_shape("AAPL", OrderType::StopLoss, dec!(10), None).is_err());
        // non-positive quantity / price
        assert!(Order::validate_shape("AAPL", OrderType::Market, dec!(0), None).is_err());
        assert!(Order::validate_shape("AAPL", OrderType::Limit, dec!(1), Some(dec!(0))).is_err());
        // degenerate symbol
        assert!(Order::validate_shape("", OrderType::Market, dec!(1), None).is_err());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(OrderType::Market.priority() > OrderType::Limit.priority());
        assert!(OrderType::Limit.priority() > OrderType::StopLoss.priority());
        assert_eq!(OrderType::StopLoss.priority(), OrderType::StopLimit.priority());
    }

    #[test]
    fn test_roundtrip_labels() {
        for side in [OrderSide::Buy, OrderSide::Sell] {
            assert_eq!(OrderSide::parse(side.as_str()), Some(side));
        }
        for t in [OrderType::Market, OrderType::Limit, OrderType::StopLoss, OrderType::StopLimit] {
            assert_eq!(OrderType::parse(t.as_str()), Some(t));
        }
        assert_eq!(OrderType::parse("ICEBERG"), None);
    }
}
