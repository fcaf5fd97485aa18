//! Orders and their lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Rejected order number.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidOrderNumber {
    #[error("order number is empty")]
    Empty,

    #[error("order number must contain only digits: {0:?}")]
    NotNumeric(String),

    #[error("order number out of range: {0}")]
    OutOfRange(String),

    #[error("order number fails the Luhn check: {0}")]
    LuhnMismatch(i64),
}

/// Purchase-order number.
///
/// Globally unique across users and used as the natural key of an order.
/// Always positive and Luhn-valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderNumber(i64);

impl OrderNumber {
    /// Validate a raw number.
    pub fn new(value: i64) -> Result<Self, InvalidOrderNumber> {
        if value <= 0 {
            return Err(InvalidOrderNumber::OutOfRange(value.to_string()));
        }
        if !luhn_valid(value as u64) {
            return Err(InvalidOrderNumber::LuhnMismatch(value));
        }
        Ok(Self(value))
    }

    /// Raw value as stored in the database.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OrderNumber {
    type Err = InvalidOrderNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.trim();
        if digits.is_empty() {
            return Err(InvalidOrderNumber::Empty);
        }
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(InvalidOrderNumber::NotNumeric(digits.to_string()));
        }
        let value: i64 = digits
            .parse()
            .map_err(|_| InvalidOrderNumber::OutOfRange(digits.to_string()))?;
        Self::new(value)
    }
}

impl TryFrom<i64> for OrderNumber {
    type Error = InvalidOrderNumber;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Luhn checksum over the decimal digits of `value`, check digit last.
fn luhn_valid(mut value: u64) -> bool {
    let mut sum = 0;
    let mut double = false;

    while value > 0 {
        let mut digit = value % 10;
        if double {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
        double = !double;
        value /= 10;
    }

    sum % 10 == 0
}

/// Stored order status.
///
/// `NEW` and `PROCESSING` are eligible for discovery; the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    New,
    Processing,
    Invalid,
    Processed,
    /// Parked for manual review after exhausting the attempt ceiling.
    DeadLetter,
}

impl OrderStatus {
    /// Statuses the dispatcher scans for.
    pub const PENDING: [OrderStatus; 2] = [OrderStatus::New, OrderStatus::Processing];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::DeadLetter => "DEAD_LETTER",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::New | OrderStatus::Processing)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "DEAD_LETTER" => Ok(OrderStatus::DeadLetter),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// A submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub number: OrderNumber,
    pub user_id: String,
    pub status: OrderStatus,
    pub accrual: Decimal,
    pub uploaded_at: DateTime<Utc>,
    /// Oracle round trips that ended without a final verdict.
    pub attempts: u32,
}

impl Order {
    /// A freshly submitted order.
    pub fn new(number: OrderNumber, user_id: impl Into<String>) -> Self {
        Self {
            number,
            user_id: user_id.into(),
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            uploaded_at: Utc::now(),
            attempts: 0,
        }
    }
}
