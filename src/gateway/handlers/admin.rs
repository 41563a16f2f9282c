//! Admin endpoints for the market-data cache.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde_json::json;

use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResult, CacheSymbolsRequest};

/// POST /admin/market-data/cache/invalidate
pub async fn cache_invalidate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CacheSymbolsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.symbols.is_empty() {
        return Err(ApiError::bad_request("symbols must not be empty"));
    }
    state.market_data.invalidate(&req.symbols).await;
    Ok(Json(json!({ "invalidated": req.symbols.len() })))
}

/// POST /admin/market-data/cache/warm
pub async fn cache_warm(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CacheSymbolsRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if req.symbols.is_empty() {
        return Err(ApiError::bad_request("symbols must not be empty"));
    }
    let warmed = state.market_data.warm(&req.symbols).await.map_err(|e| {
        ApiError::new(
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "MARKET_DATA_UNAVAILABLE",
            e.to_string(),
        )
    })?;
    Ok(Json(json!({ "warmed": warmed })))
}
