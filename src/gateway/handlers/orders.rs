//! Order endpoints: submit, lookup, status, cancel, history.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::gateway::state::AppState;
use crate::gateway::types::{
    ApiError, ApiResult, HistoryQuery, OrderStatusResponse, SubmitOrderRequest,
    SubmitOrderResponse,
};
use crate::order::model::{Order, OrderStatus};
use crate::order::service::CancelOutcome;
use crate::order::store::HistoryFilter;

/// POST /orders. 202 on a fresh submission, 200 on an idempotent replay.
pub async fn submit_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SubmitOrderRequest>,
) -> ApiResult<(StatusCode, Json<SubmitOrderResponse>)> {
    let cmd = req.into_command()?;
    let receipt = state.orders.submit(user.user_id, cmd).await?;

    let status = if receipt.duplicate {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((
        status,
        Json(SubmitOrderResponse {
            order_id: receipt.order.id,
            status: receipt.order.status.as_str(),
        }),
    ))
}

/// GET /orders/{id}
pub async fn get_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Json<Order>> {
    let order = state.orders.get(user.user_id, order_id).await?;
    Ok(Json(order))
}

/// GET /orders/{id}/status
pub async fn get_order_status(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Json<OrderStatusResponse>> {
    let order = state.orders.get(user.user_id, order_id).await?;
    Ok(Json(OrderStatusResponse {
        order_id: order.id,
        status: order.status.as_str(),
    }))
}

/// PUT /orders/{id}/cancel. Cancel of an already-terminal order is a
/// no-op that reports the current status.
pub async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(order_id): Path<Uuid>,
) -> ApiResult<Json<OrderStatusResponse>> {
    let outcome = state.orders.cancel(user.user_id, order_id).await?;
    let (order_id, status) = match outcome {
        CancelOutcome::Cancelled(order) => (order.id, order.status),
        CancelOutcome::AlreadyTerminal(order) => (order.id, order.status),
    };
    Ok(Json(OrderStatusResponse {
        order_id,
        status: status.as_str(),
    }))
}

/// GET /orders/history?status=&from=&to=&limit=&offset=
pub async fn order_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Order>>> {
    let status = match &query.status {
        Some(raw) => Some(
            OrderStatus::parse(raw)
                .ok_or_else(|| ApiError::bad_request(format!("invalid status: {raw}")))?,
        ),
        None => None,
    };
    let filter = HistoryFilter {
        status,
        from: query.from,
        to: query.to,
        limit: query.limit.unwrap_or(50),
        offset: query.offset.unwrap_or(0),
    };
    let orders = state.orders.history(user.user_id, &filter).await?;
    Ok(Json(orders))
}
