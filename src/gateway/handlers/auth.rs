//! Login handler.

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::gateway::state::AppState;
use crate::gateway::types::{ApiResult, LoginRequest, LoginResponse};

/// POST /login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let token = state.auth.login(&req.username, &req.password).await?;
    Ok(Json(LoginResponse { token }))
}
