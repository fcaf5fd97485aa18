//! Accrual verdicts: the oracle's vocabulary and the wire body it answers with.

use std::fmt;

use rust_decimal::Decimal;
use serde::Deserialize;

use super::order::{OrderNumber, OrderStatus};

/// Status vocabulary of the accrual service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    /// Known to the service, scoring not started.
    Registered,
    /// Scoring in progress.
    Processing,
    /// Rejected, no points will be awarded.
    Invalid,
    /// Scored, points awarded.
    Processed,
}

impl AccrualStatus {
    /// Whether the order's fate is settled.
    pub fn is_final(&self) -> bool {
        matches!(self, AccrualStatus::Invalid | AccrualStatus::Processed)
    }

    /// Stored status this verdict moves an order to.
    pub fn order_status(&self) -> OrderStatus {
        match self {
            AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Invalid => OrderStatus::Invalid,
            AccrualStatus::Processed => OrderStatus::Processed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccrualStatus::Registered => "REGISTERED",
            AccrualStatus::Processing => "PROCESSING",
            AccrualStatus::Invalid => "INVALID",
            AccrualStatus::Processed => "PROCESSED",
        }
    }
}

impl fmt::Display for AccrualStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `GET /api/orders/{number}` on a 200.
#[derive(Debug, Clone, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default)]
    pub accrual: Option<Decimal>,
}

/// The oracle's classification of one order.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub order: OrderNumber,
    pub status: AccrualStatus,
    /// Points to credit. Zero unless `status` is `Processed`.
    pub accrual: Decimal,
}

impl Verdict {
    pub fn new(order: OrderNumber, status: AccrualStatus, accrual: Option<Decimal>) -> Self {
        let accrual = match status {
            AccrualStatus::Processed => accrual.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        };
        Self {
            order,
            status,
            accrual,
        }
    }

    pub fn processed(order: OrderNumber, accrual: Decimal) -> Self {
        Self::new(order, AccrualStatus::Processed, Some(accrual))
    }

    pub fn invalid(order: OrderNumber) -> Self {
        Self::new(order, AccrualStatus::Invalid, None)
    }

    pub fn processing(order: OrderNumber) -> Self {
        Self::new(order, AccrualStatus::Processing, None)
    }

    pub fn is_final(&self) -> bool {
        self.status.is_final()
    }
}
