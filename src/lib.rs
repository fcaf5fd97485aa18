//! Loyalty accrual - order reconciliation pipeline
//!
//! Discovers submitted purchase orders that still await a verdict, asks the
//! external accrual service about each one, and applies the resulting status
//! and balance changes to the order store exactly once per verdict.

pub mod config;
pub mod models;
pub mod oracle;
pub mod pipeline;
pub mod storage;
pub mod utils;

pub use models::{Balance, Order, OrderNumber, OrderStatus, Verdict};
pub use oracle::{AccrualOracle, HttpAccrualClient};
pub use pipeline::{AccrualPipeline, PipelineHandle};
pub use storage::{init_storage, OrderStore};
