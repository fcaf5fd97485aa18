//! Shared storage integration tests.
//!
//! Tests the OrderStore interface against all implementations.
//! Each implementation module imports these test functions and runs them.

pub mod order_store_tests;
