//! API error shape, request DTOs and validation.
//!
//! Error bodies carry a stable machine-readable code plus a human message:
//! `{"error": "SYMBOL_UNKNOWN", "message": "..."}`. 5xx bodies never leak
//! internals.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::auth::AuthError;
use crate::order::error::OrderError;
use crate::order::model::{OrderSide, OrderType};
use crate::order::service::SubmitOrderCommand;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Unified handler error with automatic `IntoResponse`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn internal() -> Self {
        // Deliberately opaque; the cause goes to the log, not the body.
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            "internal server error",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.error.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %err, "order use case failed");
            return Self::new(status, err.code(), "internal server error");
        }
        Self::new(status, err.code(), err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingHeader | AuthError::InvalidToken => {
                Self::unauthorized(err.to_string())
            }
            AuthError::InvalidCredentials => {
                Self::new(StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS", err.to_string())
            }
            AuthError::AdminRequired => Self::forbidden(err.to_string()),
            AuthError::Store(e) => {
                tracing::error!(error = %e, "auth storage failed");
                Self::internal()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitOrderRequest {
    #[validate(length(min = 1, max = 12))]
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub idempotency_key: Option<String>,
}

impl SubmitOrderRequest {
    pub fn into_command(self) -> Result<SubmitOrderCommand, ApiError> {
        self.validate()
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        let side = OrderSide::parse(&self.side)
            .ok_or_else(|| ApiError::bad_request(format!("invalid side: {}", self.side)))?;
        let order_type = OrderType::parse(&self.order_type)
            .ok_or_else(|| ApiError::bad_request(format!("invalid type: {}", self.order_type)))?;
        Ok(SubmitOrderCommand {
            symbol: self.symbol,
            side,
            order_type,
            quantity: self.quantity,
            price: self.price,
            idempotency_key: self.idempotency_key,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct SubmitOrderResponse {
    pub order_id: uuid::Uuid,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct OrderStatusResponse {
    pub order_id: uuid::Uuid,
    pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<String>,
    pub from: Option<chrono::DateTime<chrono::Utc>>,
    pub to: Option<chrono::DateTime<chrono::Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MarketDataQuery {
    /// Comma-separated symbol list: `?symbols=AAPL,MSFT`.
    pub symbols: String,
}

#[derive(Debug, Deserialize)]
pub struct CacheSymbolsRequest {
    pub symbols: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    #[serde(rename = "availableBalance")]
    pub available_balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request(side: &str, order_type: &str) -> SubmitOrderRequest {
        SubmitOrderRequest {
            symbol: "AAPL".into(),
            side: side.into(),
            order_type: order_type.into(),
            quantity: dec!(10),
            price: Some(dec!(150)),
            idempotency_key: None,
        }
    }

    #[test]
    fn test_into_command() {
        let cmd = request("BUY", "LIMIT").into_command().unwrap();
        assert_eq!(cmd.side, OrderSide::Buy);
        assert_eq!(cmd.order_type, OrderType::Limit);
    }

    #[test]
    fn test_rejects_unknown_side_and_type() {
        assert!(request("LONG", "LIMIT").into_command().is_err());
        assert!(request("BUY", "ICEBERG").into_command().is_err());
    }

    #[test]
    fn test_order_error_mapping_hides_internals() {
        let api: ApiError = OrderError::Store("password in dsn".into()).into();
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api.message.contains("dsn"));

        let api: ApiError = OrderError::MarketClosed.into();
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.error, "MARKET_CLOSED");
    }
}
