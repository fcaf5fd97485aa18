//! Startup helpers shared by binaries and tests.

pub mod bootstrap;
pub mod retry;
