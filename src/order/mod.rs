//! Order domain: aggregate, status machine, use cases, worker.

pub mod error;
pub mod events;
pub mod model;
pub mod service;
pub mod store;
pub mod worker;

pub use error::OrderError;
pub use events::OrderEvent;
pub use model::{Order, OrderSide, OrderStatus, OrderType};
pub use service::{OrderService, ProcessOutcome, SubmitOrderCommand, SubmitReceipt};
pub use store::{ExecutionOutcome, HistoryFilter, OrderStore, PgOrderStore};
pub use worker::OrderWorker;
