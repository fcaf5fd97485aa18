//! Point balances and withdrawals.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::order::OrderNumber;

/// Running totals for one user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Balance {
    /// Points available to spend.
    pub current: Decimal,
    /// Points spent so far.
    pub withdrawn: Decimal,
}

impl Balance {
    pub fn new(current: Decimal, withdrawn: Decimal) -> Self {
        Self { current, withdrawn }
    }
}

/// Points spent against an order.
#[derive(Debug, Clone, PartialEq)]
pub struct Withdrawal {
    pub order: OrderNumber,
    pub user_id: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}
