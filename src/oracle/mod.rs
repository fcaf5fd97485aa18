//! Accrual oracle: the external service that scores orders.
//!
//! The pipeline only sees the `AccrualOracle` trait. `HttpAccrualClient`
//! speaks the real wire contract; `ScriptedOracle` replays canned replies
//! in tests.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::models::{OrderNumber, Verdict};

pub mod http;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use http::HttpAccrualClient;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::{Scripted, ScriptedOracle};

/// Transient oracle failures. The order stays pending and is retried on a
/// later scan.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),

    #[error("Malformed body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("Reply for order {got:?} while asking about {expected}")]
    OrderMismatch { expected: OrderNumber, got: String },

    #[error("Negative accrual {0}")]
    NegativeAccrual(Decimal),

    #[error("Accrual {0} exceeds the stored precision")]
    AccrualOutOfRange(Decimal),
}

/// Non-error outcomes of one oracle round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    /// 200 with a verdict in any of the four statuses.
    Verdict(Verdict),
    /// 204: the service does not know the order yet.
    NotReady,
    /// 429: back off for `retry_after` when given.
    Throttled { retry_after: Option<Duration> },
}

/// Asks the accrual service about one order.
#[async_trait]
pub trait AccrualOracle: Send + Sync {
    async fn fetch_verdict(&self, number: OrderNumber) -> Result<OracleReply, OracleError>;
}
