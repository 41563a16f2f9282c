//! Position domain error types.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum PositionError {
    /// Sell against a symbol the user does not hold. Non-retryable.
    #[error("no open position in {0}")]
    NoPosition(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("maximum open positions reached ({0})")]
    MaxPositions(i64),

    /// Optimistic-lock miss or concurrent create. The wording carries a
    /// retryable marker on purpose: the worker-side classifier routes these
    /// to the retry ladder.
    #[error("temporary conflict: concurrent position update")]
    Conflict,

    #[error("storage error: {0}")]
    Store(String),
}

impl PositionError {
    pub fn code(&self) -> &'static str {
        match self {
            PositionError::NoPosition(_) => "NO_POSITION",
            PositionError::Validation(_) => "VALIDATION_FAILED",
            PositionError::MaxPositions(_) => "MAX_POSITIONS",
            PositionError::Conflict => "POSITION_CONFLICT",
            PositionError::Store(_) => "STORAGE_ERROR",
        }
    }
}

impl From<sqlx::Error> for PositionError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.code().as_deref() == Some("23505") {
                return PositionError::Conflict;
            }
        }
        PositionError::Store(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mq::{classify_failure, ErrorClass};

    #[test]
    fn test_conflict_classifies_retryable() {
        let err = PositionError::Conflict;
        assert_eq!(classify_failure(&err.to_string()), ErrorClass::Retryable);
    }

    #[test]
    fn test_no_position_classifies_fatal() {
        let err = PositionError::NoPosition("AAPL".into());
        assert_eq!(classify_failure(&err.to_string()), ErrorClass::NonRetryable);
    }
}
