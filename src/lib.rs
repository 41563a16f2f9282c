//! orderflow: retail brokerage backend.
//!
//! Three subsystems do the heavy lifting:
//!
//! - [`order`] is the order lifecycle pipeline: synchronous intake with
//!   validation and risk checks, durable persistence, asynchronous
//!   execution, event fan-out
//! - [`position`] is the position aggregate: weighted-average cost basis,
//!   status machine, event-sourced updates under optimistic locking
//! - [`mq`] is the reliable messaging fabric: durable queues, retry
//!   ladders, dead-lettering, worker health
//!
//! Around them: [`auth`] (bearer tokens), [`market_data`] (cache-aside
//! snapshots), [`balance`] (buying power), [`db`] (PostgreSQL), [`outbox`]
//! (atomic state+message writes), [`gateway`] (HTTP façade), [`rpc`]
//! (binary service-to-service channel), [`portfolio`] (read paths).

pub mod auth;
pub mod balance;
pub mod cache;
pub mod config;
pub mod db;
pub mod gateway;
pub mod logging;
pub mod market_data;
pub mod mq;
pub mod order;
pub mod outbox;
pub mod portfolio;
pub mod position;
pub mod rpc;
pub mod types;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use mq::{Envelope, MessageHeaders, QueueSpec, RedisBroker};
pub use order::{Order, OrderService, OrderSide, OrderStatus, OrderType};
pub use position::{Position, PositionService, PositionStatus};
