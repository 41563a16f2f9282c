//! Service-to-service binary RPC.
//!
//! Length-prefixed bincode frames over TCP; every request carries a bearer
//! token, every response echoes the request id. Errors use standard RPC
//! status codes.

pub mod codec;
pub mod server;

pub use server::RpcServer;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::market_data::MarketDataEntry;
use crate::order::error::OrderError;
use crate::order::model::OrderStatus;
use crate::order::service::SubmitOrderCommand;
use crate::portfolio::CategoryAggregation;
use crate::position::model::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RpcCode {
    Ok,
    InvalidArgument,
    Unauthenticated,
    NotFound,
    FailedPrecondition,
    Internal,
    Unavailable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: RpcCode,
    pub message: String,
}

impl From<&OrderError> for RpcCode {
    fn from(err: &OrderError) -> Self {
        match err {
            OrderError::Validation(_) | OrderError::PriceOutOfBand { .. } => {
                RpcCode::InvalidArgument
            }
            OrderError::SymbolUnknown(_) | OrderError::NotFound(_) => RpcCode::NotFound,
            OrderError::InsufficientFunds { .. }
            | OrderError::InsufficientPosition { .. }
            | OrderError::MarketClosed
            | OrderError::NotCancellable(_)
            | OrderError::Conflict
            | OrderError::Forbidden => RpcCode::FailedPrecondition,
            OrderError::MarketData(_) | OrderError::Broker(_) => RpcCode::Unavailable,
            OrderError::Store(_) | OrderError::Internal(_) => RpcCode::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcCall {
    // PositionService
    GetPositions,
    GetPositionAggregation,
    // OrderService
    Submit(SubmitOrderCommand),
    GetStatus { order_id: Uuid },
    Cancel { order_id: Uuid },
    // MarketDataService
    GetMarketData { symbols: Vec<String> },
    /// Server pushes `MarketDataTick` frames every `interval_ms` until the
    /// client disconnects.
    StreamMarketData { symbols: Vec<String>, interval_ms: u64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub token: String,
    pub call: RpcCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcReply {
    Positions(Vec<Position>),
    PositionAggregation(Vec<CategoryAggregation>),
    OrderAccepted { order_id: Uuid, status: OrderStatus },
    OrderStatus { order_id: Uuid, status: OrderStatus },
    OrderCancelled { order_id: Uuid, status: OrderStatus },
    MarketData(Vec<MarketDataEntry>),
    MarketDataTick(Vec<MarketDataEntry>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub id: u64,
    pub result: Result<RpcReply, RpcFault>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_error_code_mapping() {
        assert_eq!(
            RpcCode::from(&OrderError::Validation("bad".into())),
            RpcCode::InvalidArgument
        );
        assert_eq!(
            RpcCode::from(&OrderError::SymbolUnknown("ZZZZ".into())),
            RpcCode::NotFound
        );
        assert_eq!(
            RpcCode::from(&OrderError::InsufficientFunds {
                required: dec!(100),
                available: dec!(1)
            }),
            RpcCode::FailedPrecondition
        );
        assert_eq!(
            RpcCode::from(&OrderError::MarketData("timeout".into())),
            RpcCode::Unavailable
        );
        assert_eq!(
            RpcCode::from(&OrderError::Internal("boom".into())),
            RpcCode::Internal
        );
    }

    #[test]
    fn test_request_bincode_roundtrip() {
        let req = RpcRequest {
            id: 9,
            token: "bearer-ish".into(),
            call: RpcCall::GetStatus {
                order_id: Uuid::new_v4(),
            },
        };
        let bytes = bincode::serialize(&req).unwrap();
        let back: RpcRequest = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back.id, 9);
        assert!(matches!(back.call, RpcCall::GetStatus { .. }));
    }
}
