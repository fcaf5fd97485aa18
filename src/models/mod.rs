//! Domain types shared by the store, the oracle client, and the pipeline.

mod balance;
mod order;
mod verdict;

pub use balance::{Balance, Withdrawal};
pub use order::{InvalidOrderNumber, Order, OrderNumber, OrderStatus};
pub use verdict::{AccrualResponse, AccrualStatus, Verdict};
