//! orderflow service entry point.
//!
//! Boot order: config → logging → PostgreSQL (+ schema) → Redis cache →
//! broker (+ queue declarations) → services → background workers → HTTP
//! and RPC listeners. Shutdown is a cancellation token fanned out to every
//! loop, with a drain deadline for in-flight work.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use orderflow::auth::AuthService;
use orderflow::balance::{BalanceStore, PgBalanceStore};
use orderflow::cache::CacheGateway;
use orderflow::config::AppConfig;
use orderflow::db::{schema, Database};
use orderflow::gateway::{self, state::AppState};
use orderflow::logging;
use orderflow::market_data::{CachedMarketData, MarketDataSource, PgMarketDataRepository};
use orderflow::mq::{HealthMonitor, QueuePublisher, QueueSpec, RedisBroker};
use orderflow::mq::retry::RetryScheduler;
use orderflow::order::{OrderService, OrderStore, OrderWorker, PgOrderStore};
use orderflow::outbox::OutboxDispatcher;
use orderflow::portfolio::PortfolioService;
use orderflow::position::{
    PgPositionStore, PositionGuards, PositionService, PositionStore, PositionWorker,
};
use orderflow::rpc::RpcServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();
    let _log_guard = logging::init_logging(&config.log);
    info!(http_port = config.http_port, grpc_port = config.grpc_port, "orderflow starting");

    // Pool sized for both workers plus the request path.
    let min_pool = 2 * (config.worker.order_concurrency + config.worker.max_concurrent_updates);
    let db = Database::connect(&config.database_url, min_pool as u32).await?;
    schema::init_schema(db.pool()).await?;
    let pool = db.pool().clone();

    let cache = CacheGateway::connect(&config.redis_url).await?;
    let broker = RedisBroker::connect(&config.broker_url).await?;
    broker.declare(QueueSpec::orders()).await?;
    broker.declare(QueueSpec::positions()).await?;

    // Stores and collaborators
    let order_store: Arc<dyn OrderStore> = Arc::new(PgOrderStore::new(pool.clone()));
    let position_store: Arc<dyn PositionStore> = Arc::new(PgPositionStore::new(pool.clone()));
    let balances: Arc<dyn BalanceStore> = Arc::new(PgBalanceStore::new(pool.clone()));
    let direct_market_data: Arc<dyn MarketDataSource> =
        Arc::new(PgMarketDataRepository::new(pool.clone()));
    let cached_market_data = Arc::new(CachedMarketData::new(
        direct_market_data,
        cache,
        config.market_data_ttl,
    ));
    let market_data: Arc<dyn MarketDataSource> = cached_market_data.clone();

    // Use cases
    let order_service = Arc::new(OrderService::new(
        order_store,
        position_store.clone(),
        balances,
        market_data.clone(),
        config.risk.clone(),
        config.worker.market_data_deadline,
    ));
    let position_service = Arc::new(PositionService::new(
        position_store.clone(),
        PositionGuards::from(&config.risk),
    ));
    let portfolio = Arc::new(PortfolioService::new(
        pool.clone(),
        position_store,
        position_service.clone(),
        market_data.clone(),
    ));
    let auth = Arc::new(AuthService::new(
        pool.clone(),
        config.jwt_secret.clone(),
        config.token_ttl,
    ));

    let order_worker_health = Arc::new(HealthMonitor::new(config.worker.heartbeat_interval));
    let position_worker_health = Arc::new(HealthMonitor::new(config.worker.heartbeat_interval));

    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    // Outbox dispatcher: staged rows → broker.
    let publisher: Arc<dyn QueuePublisher> = Arc::new(broker.clone());
    let dispatcher = OutboxDispatcher::new(pool.clone(), publisher);
    tasks.push(tokio::spawn(dispatcher.run(cancel.clone())));

    // Retry scheduler: due retries → main queues.
    let scheduler = RetryScheduler::new(broker.clone());
    tasks.push(tokio::spawn(scheduler.run(cancel.clone())));

    // Workers
    let order_worker = OrderWorker::new(
        broker.clone(),
        QueueSpec::orders(),
        order_service.clone(),
        order_worker_health.clone(),
        config.worker.clone(),
    );
    tasks.push(tokio::spawn(order_worker.run(cancel.clone())));

    let position_worker = PositionWorker::new(
        broker.clone(),
        QueueSpec::positions(),
        position_service,
        position_worker_health.clone(),
        config.worker.clone(),
    );
    tasks.push(tokio::spawn(position_worker.run(cancel.clone())));

    // RPC listener
    let rpc = Arc::new(RpcServer::new(
        auth.clone(),
        order_service.clone(),
        portfolio.clone(),
        market_data,
    ));
    {
        let cancel = cancel.clone();
        let grpc_port = config.grpc_port;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = rpc.serve(grpc_port, cancel).await {
                error!(error = %e, "RPC server exited");
            }
        }));
    }

    // HTTP gateway
    let state = Arc::new(AppState {
        pool,
        auth,
        orders: order_service,
        portfolio,
        market_data: cached_market_data,
        order_worker_health,
        position_worker_health,
    });
    {
        let cancel = cancel.clone();
        let http_port = config.http_port;
        tasks.push(tokio::spawn(async move {
            if let Err(e) = gateway::run_server(http_port, state, cancel).await {
                error!(error = %e, "HTTP gateway exited");
            }
        }));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining");
    cancel.cancel();

    let drain = futures::future::join_all(tasks);
    let deadline = config.worker.shutdown_deadline + std::time::Duration::from_secs(5);
    if tokio::time::timeout(deadline, drain).await.is_err() {
        error!("Drain deadline exceeded, exiting with work in flight");
    }
    info!("orderflow stopped");
    Ok(())
}
