//! Order domain error types.
//!
//! Reason codes are stable API surface; the HTTP façade and the RPC server
//! both map from here.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::model::OrderStatus;

#[derive(Debug, Error, Clone)]
pub enum OrderError {
    // === Validation ===
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("unknown symbol: {0}")]
    SymbolUnknown(String),

    #[error("price {price} deviates more than {band_pct}% from market price {market}")]
    PriceOutOfBand {
        price: Decimal,
        market: Decimal,
        band_pct: Decimal,
    },

    // === Risk ===
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("insufficient position: requested {requested}, available {available}")]
    InsufficientPosition {
        requested: Decimal,
        available: Decimal,
    },

    #[error("market is closed")]
    MarketClosed,

    // === Lookup / ownership ===
    #[error("order not found: {0}")]
    NotFound(Uuid),

    #[error("order does not belong to caller")]
    Forbidden,

    // === Lifecycle ===
    #[error("order is {} and cannot be cancelled", .0.as_str())]
    NotCancellable(OrderStatus),

    #[error("duplicate submission conflict")]
    Conflict,

    // === Collaborator failures ===
    /// Transient market-data failure; wording keeps the retryable markers
    /// visible to the worker-side classifier.
    #[error("market data unavailable: {0}")]
    MarketData(String),

    #[error("storage error: {0}")]
    Store(String),

    #[error("broker connection error: {0}")]
    Broker(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrderError {
    /// Stable machine-readable reason code for API bodies.
    pub fn code(&self) -> &'static str {
        match self {
            OrderError::Validation(_) => "VALIDATION_FAILED",
            OrderError::SymbolUnknown(_) => "SYMBOL_UNKNOWN",
            OrderError::PriceOutOfBand { .. } => "PRICE_OUT_OF_BAND",
            OrderError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            OrderError::InsufficientPosition { .. } => "INSUFFICIENT_POSITION",
            OrderError::MarketClosed => "MARKET_CLOSED",
            OrderError::NotFound(_) => "ORDER_NOT_FOUND",
            OrderError::Forbidden => "FORBIDDEN",
            OrderError::NotCancellable(_) => "NOT_CANCELLABLE",
            OrderError::Conflict => "DUPLICATE_SUBMISSION",
            OrderError::MarketData(_) => "MARKET_DATA_UNAVAILABLE",
            OrderError::Store(_) => "STORAGE_ERROR",
            OrderError::Broker(_) => "BROKER_ERROR",
            OrderError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Suggested HTTP status.
    pub fn http_status(&self) -> u16 {
        match self {
            OrderError::Validation(_) => 400,
            OrderError::SymbolUnknown(_) => 422,
            OrderError::PriceOutOfBand { .. } => 422,
            OrderError::InsufficientFunds { .. } => 422,
            OrderError::InsufficientPosition { .. } => 422,
            OrderError::MarketClosed => 409,
            OrderError::NotFound(_) => 404,
            OrderError::Forbidden => 403,
            OrderError::NotCancellable(_) => 422,
            OrderError::Conflict => 409,
            OrderError::MarketData(_) | OrderError::Broker(_) => 503,
            OrderError::Store(_) | OrderError::Internal(_) => 500,
        }
    }
}

impl From<sqlx::Error> for OrderError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some("23505") {
                return OrderError::Conflict;
            }
        }
        OrderError::Store(e.to_string())
    }
}

impl From<crate::mq::MqError> for OrderError {
    fn from(e: crate::mq::MqError) -> Self {
        OrderError::Broker(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_codes_and_statuses() {
        let err = OrderError::InsufficientFunds {
            required: dec!(1500),
            available: dec!(100),
        };
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(err.http_status(), 422);

        assert_eq!(OrderError::MarketClosed.http_status(), 409);
        assert_eq!(OrderError::Forbidden.http_status(), 403);
        assert_eq!(OrderError::NotCancellable(OrderStatus::Processing).http_status(), 422);
        assert_eq!(OrderError::MarketData("timeout".into()).http_status(), 503);
    }

    #[test]
    fn test_transient_errors_render_retryable_markers() {
        // The worker classifies by substring; these wordings are load-bearing.
        let md = OrderError::MarketData("request timed out".into());
        assert!(md.to_string().contains("unavailable"));
        let broker = OrderError::Broker("socket reset".into());
        assert!(broker.to_string().contains("connection"));
    }
}
