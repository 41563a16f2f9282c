//! Liveness endpoint: database reachability plus worker health states.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::gateway::state::AppState;
use crate::mq::HealthState;

/// GET /health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let order_worker = state.order_worker_health.state();
    let position_worker = state.position_worker_health.state();

    let degraded = !db_ok
        || matches!(order_worker, HealthState::Unhealthy | HealthState::Stopped)
        || matches!(position_worker, HealthState::Unhealthy | HealthState::Stopped);

    let status = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        status,
        Json(json!({
            "status": if degraded { "degraded" } else { "ok" },
            "database": if db_ok { "up" } else { "down" },
            "workers": {
                "order": order_worker.as_str(),
                "position": position_worker.as_str(),
            },
        })),
    )
}
