//! Order use cases: submit, cancel, status, history, and the worker-side
//! process step.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Datelike, Utc, Weekday};
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::OrderError;
use super::events::OrderEvent;
use super::model::{Order, OrderSide, OrderStatus, OrderType};
use super::store::{ExecutionOutcome, HistoryFilter, OrderStore};
use crate::balance::BalanceStore;
use crate::config::RiskConfig;
use crate::market_data::{MarketDataError, MarketDataSource};
use crate::mq::envelope::{message_types, OrderQueued, PositionUpdateMsg};
use crate::outbox::NewOutboxMessage;
use crate::position::store::PositionStore;

pub const ORDERS_QUEUE: &str = "orders.processing";
pub const POSITIONS_QUEUE: &str = "positions.updates";

/// Command accepted by the submit use case.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SubmitOrderCommand {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    pub order: Order,
    /// True when an idempotency key replayed a prior submission.
    pub duplicate: bool,
}

#[derive(Debug, Clone)]
pub enum CancelOutcome {
    Cancelled(Order),
    /// Cancel of a terminal order is a no-op returning the current status.
    AlreadyTerminal(Order),
}

/// Result of one worker-side processing step.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// Order row vanished; ack and drop.
    Missing,
    /// Redelivery of an already-settled order; ack and drop.
    AlreadyTerminal,
    /// Lost the status CAS to another holder; ack and drop.
    Raced,
    Executed(Order),
    Failed { order_id: Uuid, reason: String },
}

pub struct OrderService {
    store: Arc<dyn OrderStore>,
    positions: Arc<dyn PositionStore>,
    balances: Arc<dyn BalanceStore>,
    market_data: Arc<dyn MarketDataSource>,
    risk: RiskConfig,
    market_data_deadline: Duration,
}

impl OrderService {
    pub fn new(
        store: Arc<dyn OrderStore>,
        positions: Arc<dyn PositionStore>,
        balances: Arc<dyn BalanceStore>,
        market_data: Arc<dyn MarketDataSource>,
        risk: RiskConfig,
        market_data_deadline: Duration,
    ) -> Self {
        Self {
            store,
            positions,
            balances,
            market_data,
            risk,
            market_data_deadline,
        }
    }

    /// Submit a new order: validate, risk-check, persist PENDING together
    /// with its queue message (outbox), and hand back a 202-shaped receipt.
    pub async fn submit(
        &self,
        user_id: Uuid,
        cmd: SubmitOrderCommand,
    ) -> Result<SubmitReceipt, OrderError> {
        let symbol = cmd.symbol.trim().to_uppercase();
        Order::validate_shape(&symbol, cmd.order_type, cmd.quantity, cmd.price)?;

        // Symbol validation doubles as the market-price fetch.
        let market_price = self.fetch_price(&symbol).await?;

        if cmd.order_type.requires_price() {
            if let Some(price) = cmd.price {
                self.check_price_band(price, market_price)?;
            }
        }

        if self.risk.enforce_trading_session && !self.session_is_open() {
            return Err(OrderError::MarketClosed);
        }

        match cmd.side {
            OrderSide::Buy => {
                let required = self.buying_power_required(&cmd, market_price);
                let available = self
                    .balances
                    .available(user_id)
                    .await
                    .map_err(|e| OrderError::Store(e.to_string()))?;
                if available < required {
                    return Err(OrderError::InsufficientFunds { required, available });
                }
            }
            OrderSide::Sell => {
                let held = self
                    .positions
                    .find_open(user_id, &symbol)
                    .await
                    .map_err(|e| OrderError::Store(e.to_string()))?
                    .map(|p| p.quantity)
                    .unwrap_or(Decimal::ZERO);
                if held < cmd.quantity {
                    return Err(OrderError::InsufficientPosition {
                        requested: cmd.quantity,
                        available: held,
                    });
                }
            }
        }

        if let Some(key) = &cmd.idempotency_key {
            if let Some(prior) = self
                .store
                .find_by_idempotency(user_id, key, self.risk.idempotency_window)
                .await?
            {
                info!(order_id = %prior.id, idempotency_key = %key, "Replaying idempotent submission");
                return Ok(SubmitReceipt { order: prior, duplicate: true });
            }
        }

        let order = Order::new_pending(
            user_id,
            symbol,
            cmd.side,
            cmd.order_type,
            cmd.quantity,
            cmd.price,
            market_price,
            cmd.idempotency_key.clone(),
        );

        let outbox = NewOutboxMessage {
            aggregate_type: "order",
            aggregate_id: order.id,
            queue: ORDERS_QUEUE.to_string(),
            message_type: message_types::ORDER_PROCESS.to_string(),
            priority: order.order_type.priority(),
            payload: serde_json::to_value(OrderQueued { order_id: order.id })
                .map_err(|e| OrderError::Internal(e.to_string()))?,
        };

        match self.store.insert_pending(&order, outbox).await {
            Ok(()) => {}
            Err(OrderError::Conflict) => {
                // Lost an idempotency race to a concurrent submit; replay
                // the winner.
                if let Some(key) = &cmd.idempotency_key {
                    if let Some(prior) = self
                        .store
                        .find_by_idempotency(user_id, key, self.risk.idempotency_window)
                        .await?
                    {
                        return Ok(SubmitReceipt { order: prior, duplicate: true });
                    }
                }
                return Err(OrderError::Conflict);
            }
            Err(e) => return Err(e),
        }

        self.emit(&OrderEvent::OrderSubmitted {
            order_id: order.id,
            user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            quantity: order.quantity,
        });

        Ok(SubmitReceipt { order, duplicate: false })
    }

    /// Cancel a PENDING order. PROCESSING rejects; terminal states no-op.
    pub async fn cancel(&self, user_id: Uuid, order_id: Uuid) -> Result<CancelOutcome, OrderError> {
        let order = self.load_owned(user_id, order_id).await?;

        match order.status {
            OrderStatus::Pending => {
                if self.store.cancel(order_id).await? {
                    self.emit(&OrderEvent::OrderCancelled { order_id });
                    let mut cancelled = order;
                    cancelled.status = OrderStatus::Cancelled;
                    cancelled.updated_at = Utc::now();
                    return Ok(CancelOutcome::Cancelled(cancelled));
                }
                // Raced with the worker or another cancel; reclassify.
                let current = self
                    .store
                    .find(order_id)
                    .await?
                    .ok_or(OrderError::NotFound(order_id))?;
                if current.status.is_terminal() {
                    Ok(CancelOutcome::AlreadyTerminal(current))
                } else {
                    Err(OrderError::NotCancellable(current.status))
                }
            }
            OrderStatus::Processing => Err(OrderError::NotCancellable(OrderStatus::Processing)),
            _ => Ok(CancelOutcome::AlreadyTerminal(order)),
        }
    }

    /// Point lookup with ownership enforcement.
    pub async fn get(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, OrderError> {
        self.load_owned(user_id, order_id).await
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        filter: &HistoryFilter,
    ) -> Result<Vec<Order>, OrderError> {
        self.store.history(user_id, filter).await
    }

    /// Worker-side processing step; effectively exactly-once against the
    /// order row via the status CAS.
    ///
    /// `redelivery` is true when the message came off the retry ladder; a
    /// redelivered message is allowed to re-enter PROCESSING because it IS
    /// the in-flight lock holder.
    pub async fn process(
        &self,
        order_id: Uuid,
        redelivery: bool,
    ) -> Result<ProcessOutcome, OrderError> {
        let Some(order) = self.store.find(order_id).await? else {
            warn!(%order_id, "Order message for unknown row, dropping");
            return Ok(ProcessOutcome::Missing);
        };

        if order.status.is_terminal() {
            return Ok(ProcessOutcome::AlreadyTerminal);
        }

        match order.status {
            OrderStatus::Pending => {
                if !self.store.begin_processing(order_id).await? {
                    return Ok(ProcessOutcome::Raced);
                }
            }
            OrderStatus::Processing if !redelivery => return Ok(ProcessOutcome::Raced),
            _ => {}
        }

        // Transient failures from here bubble out to the retry ladder; the
        // redelivery re-enters the PROCESSING lock above.
        let market_price = self.fetch_price(&order.symbol).await?;
        let executed_at = Utc::now();

        let exec_price = match determine_execution_price(
            order.side,
            order.order_type,
            order.price,
            market_price,
        ) {
            Ok(price) => price,
            Err(reason) => return self.fail(order, reason).await,
        };

        // Execution-time re-checks guard against races since submit.
        match order.side {
            OrderSide::Buy => {
                let required = order.quantity * exec_price;
                let available = self
                    .balances
                    .available(order.user_id)
                    .await
                    .map_err(|e| OrderError::Store(e.to_string()))?;
                if available < required {
                    return self
                        .fail(
                            order,
                            format!(
                                "INSUFFICIENT_FUNDS: required {required}, available {available}"
                            ),
                        )
                        .await;
                }
            }
            OrderSide::Sell => {
                let held = self
                    .positions
                    .find_open(order.user_id, &order.symbol)
                    .await
                    .map_err(|e| OrderError::Store(e.to_string()))?
                    .map(|p| p.quantity)
                    .unwrap_or(Decimal::ZERO);
                if held < order.quantity {
                    let requested = order.quantity;
                    return self
                        .fail(
                            order,
                            format!(
                                "INSUFFICIENT_POSITION: requested {requested}, available {held}"
                            ),
                        )
                        .await;
                }
            }
        }

        let update = PositionUpdateMsg {
            order_id: order.id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            execution_price: exec_price,
            executed_at,
        };
        let outbox = NewOutboxMessage {
            aggregate_type: "order",
            aggregate_id: order.id,
            queue: POSITIONS_QUEUE.to_string(),
            message_type: message_types::POSITION_UPDATE.to_string(),
            priority: 5,
            payload: serde_json::to_value(&update)
                .map_err(|e| OrderError::Internal(e.to_string()))?,
        };

        let notional = order.quantity * exec_price;
        let cash_delta = match order.side {
            OrderSide::Buy => -notional,
            OrderSide::Sell => notional,
        };

        let outcome = ExecutionOutcome::executed(exec_price, executed_at);
        if !self
            .store
            .finalize(order.id, &outcome, Some((order.user_id, cash_delta)), Some(outbox))
            .await?
        {
            return Ok(ProcessOutcome::Raced);
        }

        self.emit(&OrderEvent::OrderExecuted {
            order_id: order.id,
            execution_price: exec_price,
            executed_at,
        });

        let mut executed = order;
        executed.status = OrderStatus::Executed;
        executed.execution_price = Some(exec_price);
        executed.executed_at = Some(executed_at);
        executed.updated_at = executed_at;
        Ok(ProcessOutcome::Executed(executed))
    }

    /// Terminal failure used by the worker when a message dead-letters:
    /// best-effort CAS of the row out of PENDING/PROCESSING.
    pub async fn abandon(&self, order_id: Uuid, reason: &str) -> Result<bool, OrderError> {
        let changed = self.store.mark_failed(order_id, reason).await?;
        if changed {
            self.emit(&OrderEvent::OrderFailed {
                order_id,
                reason: reason.to_string(),
            });
        }
        Ok(changed)
    }

    async fn fail(&self, order: Order, reason: String) -> Result<ProcessOutcome, OrderError> {
        let outcome = ExecutionOutcome::failed(reason.clone());
        if !self.store.finalize(order.id, &outcome, None, None).await? {
            return Ok(ProcessOutcome::Raced);
        }
        self.emit(&OrderEvent::OrderFailed {
            order_id: order.id,
            reason: reason.clone(),
        });
        Ok(ProcessOutcome::Failed {
            order_id: order.id,
            reason,
        })
    }

    async fn load_owned(&self, user_id: Uuid, order_id: Uuid) -> Result<Order, OrderError> {
        let order = self
            .store
            .find(order_id)
            .await?
            .ok_or(OrderError::NotFound(order_id))?;
        if order.user_id != user_id {
            return Err(OrderError::Forbidden);
        }
        Ok(order)
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal, OrderError> {
        let result =
            tokio::time::timeout(self.market_data_deadline, self.market_data.get_one(symbol)).await;
        match result {
            Ok(Ok(entry)) if entry.last_quote > Decimal::ZERO => Ok(entry.last_quote),
            Ok(Ok(entry)) => Err(OrderError::MarketData(format!(
                "non-positive quote for {symbol}: {}",
                entry.last_quote
            ))),
            Ok(Err(MarketDataError::SymbolUnknown(s))) => Err(OrderError::SymbolUnknown(s)),
            Ok(Err(MarketDataError::Unavailable(m))) => Err(OrderError::MarketData(m)),
            Err(_) => Err(OrderError::MarketData("deadline exceeded".to_string())),
        }
    }

    fn check_price_band(&self, price: Decimal, market: Decimal) -> Result<(), OrderError> {
        let deviation_pct = ((price - market).abs() / market) * Decimal::ONE_HUNDRED;
        if deviation_pct > self.risk.price_band_pct {
            return Err(OrderError::PriceOutOfBand {
                price,
                market,
                band_pct: self.risk.price_band_pct,
            });
        }
        Ok(())
    }

    fn buying_power_required(&self, cmd: &SubmitOrderCommand, market: Decimal) -> Decimal {
        match (cmd.order_type, cmd.price) {
            (OrderType::Limit | OrderType::StopLimit, Some(limit)) => cmd.quantity * limit,
            _ => {
                let slip = Decimal::ONE + self.risk.market_slippage_pct / Decimal::ONE_HUNDRED;
                cmd.quantity * market * slip
            }
        }
    }

    fn session_is_open(&self) -> bool {
        let now = Utc::now();
        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            return false;
        }
        let t = now.time();
        t >= self.risk.session_open && t < self.risk.session_close
    }

    fn emit(&self, event: &OrderEvent) {
        // Structured audit trail; the fabric carries the queue copies.
        info!(order_id = %event.order_id(), event = ?event, "order event");
    }
}

/// Pure execution-price rule.
///
/// MARKET executes at the current price. LIMIT executes at the current
/// price when it crosses the limit, otherwise fails (no resting). STOP
/// variants execute at the current price once the trigger level is
/// crossed.
pub fn determine_execution_price(
    side: OrderSide,
    order_type: OrderType,
    order_price: Option<Decimal>,
    market: Decimal,
) -> Result<Decimal, String> {
    match order_type {
        OrderType::Market => Ok(market),
        OrderType::Limit => {
            let limit = order_price.unwrap_or(market);
            let crossed = match side {
                OrderSide::Buy => market <= limit,
                OrderSide::Sell => market >= limit,
            };
            if crossed {
                Ok(market)
            } else {
                Err(format!(
                    "LIMIT_NOT_CROSSED: market price {market} did not cross limit {limit}"
                ))
            }
        }
        OrderType::StopLoss | OrderType::StopLimit => {
            let stop = order_price.unwrap_or(market);
            let triggered = match side {
                OrderSide::Sell => market <= stop,
                OrderSide::Buy => market >= stop,
            };
            if triggered {
                Ok(market)
            } else {
                Err(format!(
                    "STOP_NOT_TRIGGERED: market price {market} did not reach stop {stop}"
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_market_executes_at_market() {
        let px = determine_execution_price(OrderSide::Buy, OrderType::Market, None, dec!(150));
        assert_eq!(px, Ok(dec!(150)));
    }

    #[test]
    fn test_limit_buy_crossing() {
        // Buy limit 150: fills when market at or below.
        assert_eq!(
            determine_execution_price(OrderSide::Buy, OrderType::Limit, Some(dec!(150)), dec!(148)),
            Ok(dec!(148))
        );
        let miss = determine_execution_price(
            OrderSide::Buy,
            OrderType::Limit,
            Some(dec!(150)),
            dec!(151),
        );
        assert!(miss.unwrap_err().starts_with("LIMIT_NOT_CROSSED"));
    }

    #[test]
    fn test_limit_sell_crossing() {
        assert_eq!(
            determine_execution_price(OrderSide::Sell, OrderType::Limit, Some(dec!(150)), dec!(152)),
            Ok(dec!(152))
        );
        assert!(determine_execution_price(
            OrderSide::Sell,
            OrderType::Limit,
            Some(dec!(150)),
            dec!(149)
        )
        .is_err());
    }

    #[test]
    fn test_stop_loss_trigger() {
        // Sell stop 140: triggers once market falls to it.
        assert_eq!(
            determine_execution_price(
                OrderSide::Sell,
                OrderType::StopLoss,
                Some(dec!(140)),
                dec!(139)
            ),
            Ok(dec!(139))
        );
        let held = determine_execution_price(
            OrderSide::Sell,
            OrderType::StopLoss,
            Some(dec!(140)),
            dec!(145),
        );
        assert!(held.unwrap_err().starts_with("STOP_NOT_TRIGGERED"));

        // Buy stop 160: triggers once market rises to it.
        assert_eq!(
            determine_execution_price(
                OrderSide::Buy,
                OrderType::StopLimit,
                Some(dec!(160)),
                dec!(161)
            ),
            Ok(dec!(161))
        );
    }
}
