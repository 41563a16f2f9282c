#![allow(dead_code)]

//! In-memory collaborator fakes and a pipeline harness.
//!
//! The harness wires the submit use case, the worker-side process step and
//! the position use cases against in-memory stores, then "pumps" staged
//! outbox messages the way the dispatcher + workers would.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use orderflow::balance::{BalanceError, BalanceStore};
use orderflow::config::RiskConfig;
use orderflow::market_data::{MarketDataEntry, MarketDataError, MarketDataSource};
use orderflow::mq::PositionUpdateMsg;
use orderflow::order::error::OrderError;
use orderflow::order::model::{Order, OrderStatus};
use orderflow::order::service::{OrderService, ProcessOutcome};
use orderflow::order::store::{ExecutionOutcome, HistoryFilter, OrderStore};
use orderflow::outbox::NewOutboxMessage;
use orderflow::position::error::PositionError;
use orderflow::position::events::PositionEvent;
use orderflow::position::model::Position;
use orderflow::position::service::{PositionGuards, PositionService};
use orderflow::position::store::PositionStore;

// ============================================================================
// Shared cash ledger
// ============================================================================

#[derive(Default)]
pub struct SharedLedger {
    balances: Mutex<HashMap<Uuid, Decimal>>,
}

impl SharedLedger {
    pub fn set(&self, user: Uuid, amount: Decimal) {
        self.balances.lock().unwrap().insert(user, amount);
    }

    pub fn get(&self, user: Uuid) -> Decimal {
        self.balances
            .lock()
            .unwrap()
            .get(&user)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn credit(&self, user: Uuid, delta: Decimal) {
        *self.balances.lock().unwrap().entry(user).or_default() += delta;
    }
}

pub struct FakeBalances {
    ledger: Arc<SharedLedger>,
}

#[async_trait]
impl BalanceStore for FakeBalances {
    async fn available(&self, user_id: Uuid) -> Result<Decimal, BalanceError> {
        Ok(self.ledger.get(user_id))
    }
}

// ============================================================================
// Order store fake
// ============================================================================

#[derive(Default)]
pub struct FakeOrderStore {
    orders: Mutex<HashMap<Uuid, Order>>,
    pub outbox: Mutex<Vec<NewOutboxMessage>>,
    ledger: Arc<SharedLedger>,
}

impl FakeOrderStore {
    fn with_ledger(ledger: Arc<SharedLedger>) -> Self {
        Self {
            orders: Mutex::default(),
            outbox: Mutex::default(),
            ledger,
        }
    }

    pub fn order(&self, id: Uuid) -> Option<Order> {
        self.orders.lock().unwrap().get(&id).cloned()
    }

    pub fn order_count(&self) -> usize {
        self.orders.lock().unwrap().len()
    }

    /// Staged-and-unconsumed messages for a queue.
    pub fn staged(&self, queue: &str) -> Vec<NewOutboxMessage> {
        self.outbox
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.queue == queue)
            .cloned()
            .collect()
    }

    /// Drain staged messages for a queue (dispatcher behavior).
    pub fn drain(&self, queue: &str) -> Vec<NewOutboxMessage> {
        let mut outbox = self.outbox.lock().unwrap();
        let (matching, rest): (Vec<_>, Vec<_>) =
            outbox.drain(..).partition(|m| m.queue == queue);
        *outbox = rest;
        matching
    }
}

#[async_trait]
impl OrderStore for FakeOrderStore {
    async fn insert_pending(
        &self,
        order: &Order,
        outbox: NewOutboxMessage,
    ) -> Result<(), OrderError> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(key) = &order.idempotency_key {
            let duplicate = orders
                .values()
                .any(|o| o.user_id == order.user_id && o.idempotency_key.as_ref() == Some(key));
            if duplicate {
                return Err(OrderError::Conflict);
            }
        }
        orders.insert(order.id, order.clone());
        self.outbox.lock().unwrap().push(outbox);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>, OrderError> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_idempotency(
        &self,
        user_id: Uuid,
        key: &str,
        window: Duration,
    ) -> Result<Option<Order>, OrderError> {
        let since = Utc::now() - chrono::Duration::from_std(window).unwrap();
        Ok(self
            .orders
            .lock()
            .unwrap()
            .values()
            .find(|o| {
                o.user_id == user_id
                    && o.idempotency_key.as_deref() == Some(key)
                    && o.created_at >= since
            })
            .cloned())
    }

    async fn begin_processing(&self, id: Uuid) -> Result<bool, OrderError> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Processing;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn finalize(
        &self,
        id: Uuid,
        outcome: &ExecutionOutcome,
        cash_delta: Option<(Uuid, Decimal)>,
        outbox: Option<NewOutboxMessage>,
    ) -> Result<bool, OrderError> {
        let mut orders = self.orders.lock().unwrap();
        let Some(order) = orders.get_mut(&id) else {
            return Ok(false);
        };
        if order.status != OrderStatus::Processing {
            return Ok(false);
        }
        order.status = outcome.status;
        order.execution_price = outcome.execution_price;
        order.executed_at = outcome.executed_at;
        order.failure_reason = outcome.failure_reason.clone();
        order.updated_at = Utc::now();
        drop(orders);

        if let Some((user, delta)) = cash_delta {
            self.ledger.credit(user, delta);
        }
        if let Some(msg) = outbox {
            self.outbox.lock().unwrap().push(msg);
        }
        Ok(true)
    }

    async fn cancel(&self, id: Uuid) -> Result<bool, OrderError> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&id) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Cancelled;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, OrderError> {
        let mut orders = self.orders.lock().unwrap();
        match orders.get_mut(&id) {
            Some(order) if !order.status.is_terminal() => {
                order.status = OrderStatus::Failed;
                order.failure_reason = Some(reason.to_string());
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn history(
        &self,
        user_id: Uuid,
        filter: &HistoryFilter,
    ) -> Result<Vec<Order>, OrderError> {
        let mut rows: Vec<Order> = self
            .orders
            .lock()
            .unwrap()
            .values()
            .filter(|o| o.user_id == user_id)
            .filter(|o| filter.status.map_or(true, |s| o.status == s))
            .filter(|o| filter.from.map_or(true, |f| o.created_at >= f))
            .filter(|o| filter.to.map_or(true, |t| o.created_at <= t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }
}

// ============================================================================
// Position store fake
// ============================================================================

#[derive(Default)]
pub struct FakePositionStore {
    positions: Mutex<HashMap<Uuid, Position>>,
    applied: Mutex<HashSet<Uuid>>,
}

impl FakePositionStore {
    pub fn open_position(&self, user: Uuid, symbol: &str) -> Option<Position> {
        self.positions
            .lock()
            .unwrap()
            .values()
            .find(|p| p.user_id == user && p.symbol == symbol && p.status.is_open())
            .cloned()
    }

    pub fn all(&self) -> Vec<Position> {
        self.positions.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl PositionStore for FakePositionStore {
    async fn find_open(
        &self,
        user_id: Uuid,
        symbol: &str,
    ) -> Result<Option<Position>, PositionError> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .values()
            .find(|p| p.user_id == user_id && p.symbol == symbol && p.status.is_open())
            .cloned())
    }

    async fn is_applied(&self, order_id: Uuid) -> Result<bool, PositionError> {
        Ok(self.applied.lock().unwrap().contains(&order_id))
    }

    async fn insert(
        &self,
        position: &Position,
        source_order: Option<Uuid>,
    ) -> Result<(), PositionError> {
        let mut positions = self.positions.lock().unwrap();
        let clash = positions
            .values()
            .any(|p| p.user_id == position.user_id && p.symbol == position.symbol && p.status.is_open());
        if clash {
            return Err(PositionError::Conflict);
        }
        positions.insert(position.id, position.clone());
        if let Some(order_id) = source_order {
            self.applied.lock().unwrap().insert(order_id);
        }
        Ok(())
    }

    async fn update_cas(
        &self,
        position: &Position,
        prev_updated_at: DateTime<Utc>,
        source_order: Option<Uuid>,
    ) -> Result<bool, PositionError> {
        let mut positions = self.positions.lock().unwrap();
        let Some(stored) = positions.get_mut(&position.id) else {
            return Ok(false);
        };
        if stored.updated_at != prev_updated_at {
            return Ok(false);
        }
        *stored = position.clone();
        if let Some(order_id) = source_order {
            self.applied.lock().unwrap().insert(order_id);
        }
        Ok(true)
    }

    async fn list_open(&self, user_id: Uuid) -> Result<Vec<Position>, PositionError> {
        let mut rows: Vec<Position> = self
            .positions
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.user_id == user_id && p.status.is_open())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(rows)
    }

    async fn count_open(&self, user_id: Uuid) -> Result<i64, PositionError> {
        Ok(self
            .positions
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.user_id == user_id && p.status.is_open())
            .count() as i64)
    }
}

// ============================================================================
// Market data fake
// ============================================================================

#[derive(Default)]
pub struct FakeMarketData {
    prices: Mutex<HashMap<String, Decimal>>,
    outage: Mutex<Option<String>>,
}

impl FakeMarketData {
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.lock().unwrap().insert(symbol.to_string(), price);
    }

    /// Simulate a transient outage; every call fails with this message.
    pub fn fail_with(&self, message: &str) {
        *self.outage.lock().unwrap() = Some(message.to_string());
    }

    pub fn recover(&self) {
        *self.outage.lock().unwrap() = None;
    }
}

#[async_trait]
impl MarketDataSource for FakeMarketData {
    async fn get(&self, symbols: &[String]) -> Result<Vec<MarketDataEntry>, MarketDataError> {
        if let Some(message) = self.outage.lock().unwrap().clone() {
            return Err(MarketDataError::Unavailable(message));
        }
        let prices = self.prices.lock().unwrap();
        Ok(symbols
            .iter()
            .filter_map(|s| {
                prices.get(s).map(|px| MarketDataEntry {
                    symbol: s.clone(),
                    name: format!("{s} Inc."),
                    category: "EQUITY".to_string(),
                    last_quote: *px,
                    updated_at: Utc::now(),
                })
            })
            .collect())
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub orders: Arc<OrderService>,
    pub positions: Arc<PositionService>,
    pub order_store: Arc<FakeOrderStore>,
    pub position_store: Arc<FakePositionStore>,
    pub market_data: Arc<FakeMarketData>,
    pub ledger: Arc<SharedLedger>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_risk(RiskConfig::default())
    }

    pub fn with_risk(risk: RiskConfig) -> Self {
        let ledger = Arc::new(SharedLedger::default());
        let order_store = Arc::new(FakeOrderStore::with_ledger(ledger.clone()));
        let position_store = Arc::new(FakePositionStore::default());
        let market_data = Arc::new(FakeMarketData::default());
        let balances = Arc::new(FakeBalances {
            ledger: ledger.clone(),
        });

        let orders = Arc::new(OrderService::new(
            order_store.clone(),
            position_store.clone(),
            balances,
            market_data.clone(),
            risk.clone(),
            Duration::from_millis(500),
        ));
        let positions = Arc::new(PositionService::new(
            position_store.clone(),
            PositionGuards::from(&risk),
        ));

        Self {
            orders,
            positions,
            order_store,
            position_store,
            market_data,
            ledger,
        }
    }

    /// Run staged order messages through the worker-side process step.
    pub async fn pump_orders(&self) -> Vec<ProcessOutcome> {
        let mut outcomes = Vec::new();
        for msg in self.order_store.drain("orders.processing") {
            let order_id = msg.payload["order_id"]
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .expect("order message payload carries an order_id");
            outcomes.push(self.orders.process(order_id, false).await.unwrap());
        }
        outcomes
    }

    /// Apply staged position updates, returning all emitted events.
    pub async fn pump_positions(&self) -> Vec<PositionEvent> {
        let mut events = Vec::new();
        for msg in self.order_store.drain("positions.updates") {
            let update: PositionUpdateMsg = serde_json::from_value(msg.payload).unwrap();
            events.extend(self.positions.apply(&update).await.unwrap());
        }
        events
    }

    /// Submit → process → apply, end to end.
    pub async fn pump(&self) -> Vec<PositionEvent> {
        self.pump_orders().await;
        self.pump_positions().await
    }
}
