//! Gateway application state (shared).

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::AuthService;
use crate::market_data::CachedMarketData;
use crate::mq::HealthMonitor;
use crate::order::service::OrderService;
use crate::portfolio::PortfolioService;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub auth: Arc<AuthService>,
    pub orders: Arc<OrderService>,
    pub portfolio: Arc<PortfolioService>,
    pub market_data: Arc<CachedMarketData>,
    pub order_worker_health: Arc<HealthMonitor>,
    pub position_worker_health: Arc<HealthMonitor>,
}
