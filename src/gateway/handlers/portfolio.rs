//! Portfolio read endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};

use crate::auth::AuthUser;
use crate::gateway::state::AppState;
use crate::gateway::types::{ApiError, ApiResult, BalanceResponse};
use crate::portfolio::{CategoryAggregation, PortfolioError, PortfolioSummary};

fn map_err(e: PortfolioError) -> ApiError {
    match e {
        PortfolioError::MarketData(msg) => ApiError::new(
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "MARKET_DATA_UNAVAILABLE",
            msg,
        ),
        PortfolioError::Store(msg) => {
            tracing::error!(error = %msg, "portfolio read failed");
            ApiError::internal()
        }
    }
}

/// GET /getBalance
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<BalanceResponse>> {
    let available = state
        .portfolio
        .available_balance(user.user_id)
        .await
        .map_err(map_err)?;
    Ok(Json(BalanceResponse {
        available_balance: available,
    }))
}

/// GET /getAucAggregation
pub async fn get_auc_aggregation(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Vec<CategoryAggregation>>> {
    let aggregation = state
        .portfolio
        .aggregation(user.user_id)
        .await
        .map_err(map_err)?;
    Ok(Json(aggregation))
}

/// GET /getPortfolioSummary
pub async fn get_portfolio_summary(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<PortfolioSummary>> {
    let summary = state.portfolio.summary(user.user_id).await.map_err(map_err)?;
    Ok(Json(summary))
}
