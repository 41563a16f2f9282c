//! Position use cases: create / update / close, driven by execution
//! messages, plus the price-mark path.
//!
//! Events are collected into a side-channel the caller drains after save;
//! they are never persisted with the aggregate.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::PositionError;
use super::events::{PositionEvent, PositionSnapshot, TradeTransaction};
use super::model::Position;
use super::store::PositionStore;
use crate::config::RiskConfig;
use crate::mq::PositionUpdateMsg;
use crate::order::model::OrderSide;

/// Business guards applied by the position use cases. Guard failures fail
/// the use case (dead-letter), never the worker.
#[derive(Debug, Clone)]
pub struct PositionGuards {
    pub min_trade_value: Decimal,
    /// Close prices below `average_price * floor_pct` are rejected.
    pub close_price_floor_pct: Decimal,
    pub min_holding_period: std::time::Duration,
    pub max_positions_per_user: i64,
}

impl From<&RiskConfig> for PositionGuards {
    fn from(risk: &RiskConfig) -> Self {
        Self {
            min_trade_value: risk.min_trade_value,
            close_price_floor_pct: risk.close_price_floor_pct,
            min_holding_period: risk.min_holding_period,
            max_positions_per_user: risk.max_positions_per_user,
        }
    }
}

pub struct PositionService {
    store: Arc<dyn PositionStore>,
    guards: PositionGuards,
}

impl PositionService {
    pub fn new(store: Arc<dyn PositionStore>, guards: PositionGuards) -> Self {
        Self { store, guards }
    }

    /// Apply one execution to the position aggregate. Returns the emitted
    /// domain events; an already-applied source order is a silent no-op.
    pub async fn apply(&self, msg: &PositionUpdateMsg) -> Result<Vec<PositionEvent>, PositionError> {
        if self.store.is_applied(msg.order_id).await? {
            debug!(order_id = %msg.order_id, "Duplicate position update, skipping");
            return Ok(Vec::new());
        }

        if msg.quantity <= Decimal::ZERO || msg.execution_price <= Decimal::ZERO {
            return self.validation_failure(msg, "non-positive quantity or price");
        }
        if msg.quantity * msg.execution_price < self.guards.min_trade_value {
            return self.validation_failure(msg, "trade value below minimum");
        }

        let events = match msg.side {
            OrderSide::Buy => self.apply_buy(msg).await?,
            OrderSide::Sell => self.apply_sell(msg).await?,
        };

        for event in &events {
            info!(event = ?event, "position event");
        }
        Ok(events)
    }

    async fn apply_buy(&self, msg: &PositionUpdateMsg) -> Result<Vec<PositionEvent>, PositionError> {
        match self.store.find_open(msg.user_id, &msg.symbol).await? {
            Some(mut position) => {
                let prev_updated_at = position.updated_at;
                let before = PositionSnapshot::from(&position);
                position.apply_buy(msg.quantity, msg.execution_price, msg.executed_at);

                if !self
                    .store
                    .update_cas(&position, prev_updated_at, Some(msg.order_id))
                    .await?
                {
                    return Err(PositionError::Conflict);
                }

                Ok(vec![PositionEvent::PositionUpdated {
                    position_id: position.id,
                    user_id: position.user_id,
                    symbol: position.symbol.clone(),
                    before,
                    after: PositionSnapshot::from(&position),
                    transaction: TradeTransaction {
                        side: OrderSide::Buy,
                        quantity: msg.quantity,
                        price: msg.execution_price,
                        realized_pnl: None,
                    },
                    source_order_id: Some(msg.order_id),
                }])
            }
            None => {
                let open_count = self.store.count_open(msg.user_id).await?;
                if open_count >= self.guards.max_positions_per_user {
                    warn!(
                        user_id = %msg.user_id,
                        open_count,
                        "position_validation_failed: position limit reached"
                    );
                    return Err(PositionError::MaxPositions(self.guards.max_positions_per_user));
                }

                let position = Position::open(
                    msg.user_id,
                    msg.symbol.clone(),
                    msg.quantity,
                    msg.execution_price,
                    msg.executed_at,
                );
                self.store.insert(&position, Some(msg.order_id)).await?;

                Ok(vec![PositionEvent::PositionCreated {
                    position_id: position.id,
                    user_id: position.user_id,
                    symbol: position.symbol.clone(),
                    quantity: position.quantity,
                    average_price: position.average_price,
                    source_order_id: Some(msg.order_id),
                }])
            }
        }
    }

    async fn apply_sell(&self, msg: &PositionUpdateMsg) -> Result<Vec<PositionEvent>, PositionError> {
        let Some(mut position) = self.store.find_open(msg.user_id, &msg.symbol).await? else {
            return Err(PositionError::NoPosition(msg.symbol.clone()));
        };

        let closing = msg.quantity >= position.quantity;
        if closing {
            // Fat-finger guard: a close priced this far below basis is
            // almost certainly bad data, not a trade.
            let floor = position.average_price * self.guards.close_price_floor_pct;
            if msg.execution_price < floor {
                return self.validation_failure(
                    msg,
                    &format!(
                        "close price {} below sanity floor {floor} (avg {})",
                        msg.execution_price, position.average_price
                    ),
                );
            }
            if !self.guards.min_holding_period.is_zero() {
                let held = position.holding_period(Utc::now());
                let min = chrono::Duration::from_std(self.guards.min_holding_period)
                    .unwrap_or(chrono::Duration::zero());
                if held < min {
                    return self.validation_failure(msg, "minimum holding period not met");
                }
            }
        }

        let prev_updated_at = position.updated_at;
        let before = PositionSnapshot::from(&position);
        // A close consumes at most what the position holds.
        let sell_qty = if closing { position.quantity } else { msg.quantity };
        let realized = position.apply_sell(sell_qty, msg.execution_price, msg.executed_at);

        if !self
            .store
            .update_cas(&position, prev_updated_at, Some(msg.order_id))
            .await?
        {
            return Err(PositionError::Conflict);
        }

        let mut events = vec![PositionEvent::PositionUpdated {
            position_id: position.id,
            user_id: position.user_id,
            symbol: position.symbol.clone(),
            before,
            after: PositionSnapshot::from(&position),
            transaction: TradeTransaction {
                side: OrderSide::Sell,
                quantity: sell_qty,
                price: msg.execution_price,
                realized_pnl: Some(realized),
            },
            source_order_id: Some(msg.order_id),
        }];

        if closing {
            events.push(PositionEvent::PositionClosed {
                position_id: position.id,
                user_id: position.user_id,
                symbol: position.symbol.clone(),
                holding_period_secs: position.holding_period(Utc::now()).num_seconds(),
                realized_pnl: realized,
                source_order_id: Some(msg.order_id),
            });
        }

        Ok(events)
    }

    /// Refresh the market snapshot of an open position. Emits
    /// `PositionPriceUpdated` only when the price actually changed.
    pub async fn mark_price(
        &self,
        user_id: Uuid,
        symbol: &str,
        price: Decimal,
    ) -> Result<Option<PositionEvent>, PositionError> {
        let Some(mut position) = self.store.find_open(user_id, symbol).await? else {
            return Ok(None);
        };
        let old_price = position.current_price;
        if !position.mark_price(price) {
            return Ok(None);
        }
        let prev_updated_at = position.updated_at;
        position.updated_at = Utc::now();
        if !self.store.update_cas(&position, prev_updated_at, None).await? {
            // Lost to a trade update; the trade's snapshot wins.
            return Ok(None);
        }
        Ok(Some(PositionEvent::PositionPriceUpdated {
            position_id: position.id,
            symbol: position.symbol.clone(),
            old_price,
            new_price: price,
            at: position.updated_at,
        }))
    }

    fn validation_failure(
        &self,
        msg: &PositionUpdateMsg,
        reason: &str,
    ) -> Result<Vec<PositionEvent>, PositionError> {
        warn!(
            user_id = %msg.user_id,
            symbol = %msg.symbol,
            order_id = %msg.order_id,
            reason,
            "position_validation_failed"
        );
        Err(PositionError::Validation(reason.to_string()))
    }
}
