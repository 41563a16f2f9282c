//! HTTP gateway: route, auth-wrap, marshal. Thin glue over the use cases.

pub mod handlers;
pub mod state;
pub mod types;

use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::auth::middleware::{require_admin, require_auth};
use state::AppState;

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route("/login", post(handlers::auth::login))
        .route("/health", get(handlers::health::health_check));

    let user_routes = Router::new()
        .route("/getBalance", get(handlers::portfolio::get_balance))
        .route("/getAucAggregation", get(handlers::portfolio::get_auc_aggregation))
        .route("/getPortfolioSummary", get(handlers::portfolio::get_portfolio_summary))
        .route("/getMarketData", get(handlers::market::get_market_data))
        .route("/getWatchlist", get(handlers::market::get_watchlist))
        .route("/orders", post(handlers::orders::submit_order))
        .route("/orders/history", get(handlers::orders::order_history))
        .route("/orders/{id}", get(handlers::orders::get_order))
        .route("/orders/{id}/status", get(handlers::orders::get_order_status))
        .route("/orders/{id}/cancel", put(handlers::orders::cancel_order))
        .layer(from_fn_with_state(state.clone(), require_auth));

    let admin_routes = Router::new()
        .route(
            "/admin/market-data/cache/invalidate",
            post(handlers::admin::cache_invalidate),
        )
        .route(
            "/admin/market-data/cache/warm",
            post(handlers::admin::cache_warm),
        )
        .layer(from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(public_routes)
        .merge(user_routes)
        .merge(admin_routes)
        .with_state(state)
}

/// Bind and serve until cancelled.
pub async fn run_server(
    port: u16,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "HTTP gateway listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("HTTP gateway stopped");
    Ok(())
}
