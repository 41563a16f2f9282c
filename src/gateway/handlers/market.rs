//! Market-data and watchlist read endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::{Extension, Json};

use crate::auth::AuthUser;
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResult, MarketDataQuery};
use crate::market_data::{MarketDataEntry, MarketDataSource};

/// GET /getMarketData?symbols=AAPL,MSFT
pub async fn get_market_data(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarketDataQuery>,
) -> ApiResult<Json<Vec<MarketDataEntry>>> {
    let symbols: Vec<String> = query
        .symbols
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(ApiError::bad_request("symbols query parameter is required"));
    }

    let entries = state
        .market_data
        .get(&symbols)
        .await
        .map_err(|e| ApiError::new(
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "MARKET_DATA_UNAVAILABLE",
            e.to_string(),
        ))?;
    Ok(Json(entries))
}

/// GET /getWatchlist
pub async fn get_watchlist(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<MarketDataEntry>>> {
    let entries = state.portfolio.watchlist(user.user_id).await.map_err(|e| {
        tracing::error!(error = %e, "watchlist read failed");
        ApiError::internal()
    })?;
    Ok(Json(entries))
}
