//! JWT auth middleware for the HTTP gateway.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::gateway::state::AppState;
use crate::gateway::types::ApiError;

/// Require a valid bearer token; injects [`crate::auth::AuthUser`].
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let user = state.auth.verify_bearer(header)?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Require a valid bearer token with the admin claim.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let user = state.auth.verify_bearer(header)?;
    if !user.admin {
        return Err(ApiError::from(crate::auth::AuthError::AdminRequired));
    }
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}
