//! Position domain: aggregate, weighted-average math, use cases, worker.

pub mod error;
pub mod events;
pub mod model;
pub mod service;
pub mod store;
pub mod worker;

pub use error::PositionError;
pub use events::{PositionEvent, PositionSnapshot, TradeTransaction};
pub use model::{Position, PositionStatus, PositionType};
pub use service::{PositionGuards, PositionService};
pub use store::{PgPositionStore, PositionStore};
pub use worker::PositionWorker;
