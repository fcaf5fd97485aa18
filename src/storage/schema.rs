//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.
//! The request-handling side reads and writes the same tables, so column names
//! and status strings are part of the contract.

use sea_query::Iden;

/// Orders table schema.
#[derive(Iden)]
pub enum Orders {
    Table,
    #[iden = "number"]
    Number,
    #[iden = "user_id"]
    UserId,
    #[iden = "status"]
    Status,
    #[iden = "accrual"]
    Accrual,
    #[iden = "uploaded_at"]
    UploadedAt,
    #[iden = "attempts"]
    Attempts,
}

/// Per-user balance table schema.
#[derive(Iden)]
pub enum UserBalances {
    Table,
    #[iden = "user_id"]
    UserId,
    #[iden = "current"]
    Current,
    #[iden = "withdrawn"]
    Withdrawn,
}

/// Withdrawals table schema.
#[derive(Iden)]
pub enum Withdrawals {
    Table,
    #[iden = "number"]
    Number,
    #[iden = "user_id"]
    UserId,
    #[iden = "sum"]
    Sum,
    #[iden = "processed_at"]
    ProcessedAt,
}

/// SQLite schema. Amounts are decimal strings, timestamps RFC 3339 UTC.
pub const SQLITE_SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS orders (
    number INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'NEW',
    accrual TEXT NOT NULL DEFAULT '0',
    uploaded_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
)
"#,
    "CREATE INDEX IF NOT EXISTS idx_orders_status_uploaded_at ON orders(status, uploaded_at)",
    "CREATE INDEX IF NOT EXISTS idx_orders_user_id ON orders(user_id)",
    r#"
CREATE TABLE IF NOT EXISTS user_balances (
    user_id TEXT PRIMARY KEY,
    "current" TEXT NOT NULL DEFAULT '0',
    withdrawn TEXT NOT NULL DEFAULT '0'
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS withdrawals (
    number INTEGER PRIMARY KEY,
    user_id TEXT NOT NULL,
    sum TEXT NOT NULL,
    processed_at TEXT NOT NULL
)
"#,
];

/// PostgreSQL schema.
pub const POSTGRES_SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS orders (
    number BIGINT PRIMARY KEY,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'NEW',
    accrual NUMERIC(16, 2) NOT NULL DEFAULT 0,
    uploaded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    attempts INTEGER NOT NULL DEFAULT 0
)
"#,
    "CREATE INDEX IF NOT EXISTS idx_orders_status_uploaded_at ON orders(status, uploaded_at)",
    "CREATE INDEX IF NOT EXISTS idx_orders_user_id ON orders(user_id)",
    r#"
CREATE TABLE IF NOT EXISTS user_balances (
    user_id TEXT PRIMARY KEY,
    "current" NUMERIC(16, 2) NOT NULL DEFAULT 0 CHECK ("current" >= 0),
    withdrawn NUMERIC(16, 2) NOT NULL DEFAULT 0
)
"#,
    r#"
CREATE TABLE IF NOT EXISTS withdrawals (
    number BIGINT PRIMARY KEY,
    user_id TEXT NOT NULL,
    sum NUMERIC(16, 2) NOT NULL,
    processed_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#,
];

/// Format a timestamp the way the SQLite schema stores it.
///
/// Fixed-width UTC so that text ordering matches time ordering.
pub fn sqlite_timestamp(ts: &chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}
