//! Order store: persistence for orders, balances, and withdrawals.
//!
//! The pipeline consumes two operations, `list_pending` and `apply_verdict`
//! (plus `record_attempt` for dead-lettering). The rest of the trait is the
//! surface the request-handling side relies on and shares the same tables.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::config::StorageConfig;
use crate::models::{Balance, Order, OrderNumber, Verdict, Withdrawal};

pub mod schema;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteOrderStore;

#[cfg(feature = "postgres")]
pub use postgres::PostgresOrderStore;

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockOrderStore;

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Order not found: {0}")]
    OrderNotFound(OrderNumber),

    #[error("Order {0} has already been submitted by this user")]
    AlreadySubmitted(OrderNumber),

    #[error("Order {0} belongs to another user")]
    OwnedByAnotherUser(OrderNumber),

    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Withdrawal already recorded for order {0}")]
    DuplicateWithdrawal(OrderNumber),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// What `apply_verdict` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Status and accrual written; balance credited for `PROCESSED`.
    Applied,
    /// Order was already terminal; nothing written.
    AlreadyFinal,
}

/// What `record_attempt` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Attempt counted; order stays eligible for discovery.
    Counted { attempts: u32 },
    /// Attempt ceiling reached; order moved to `DEAD_LETTER`.
    DeadLettered { attempts: u32 },
    /// Order was already terminal; nothing written.
    AlreadyFinal,
}

/// Interface for order persistence.
///
/// Implementations:
/// - `SqliteOrderStore`: SQLite storage (default)
/// - `PostgresOrderStore`: PostgreSQL storage
/// - `MockOrderStore`: in-memory, for tests
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Up to `limit` orders still awaiting a verdict, oldest first.
    async fn list_pending(&self, limit: usize) -> Result<Vec<Order>>;

    /// Write one verdict: order status/accrual plus the owner's balance, atomically.
    ///
    /// Orders already in a terminal status are left untouched, so a verdict
    /// delivered twice credits the balance once.
    async fn apply_verdict(&self, verdict: &Verdict) -> Result<ApplyOutcome>;

    /// Count one oracle round trip that ended without a final verdict.
    ///
    /// With `max_attempts` set, the order is dead-lettered once the count reaches it.
    async fn record_attempt(
        &self,
        number: OrderNumber,
        max_attempts: Option<u32>,
    ) -> Result<AttemptOutcome>;

    /// Register a newly submitted order in status `NEW`.
    async fn submit_order(&self, user_id: &str, number: OrderNumber) -> Result<Order>;

    /// Look up one order.
    async fn get_order(&self, number: OrderNumber) -> Result<Option<Order>>;

    /// All orders of a user, newest first.
    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<Order>>;

    /// Current balance. Users with no balance row read as zero.
    async fn balance(&self, user_id: &str) -> Result<Balance>;

    /// Spend points against `order`, returning the new balance.
    async fn withdraw(&self, user_id: &str, order: OrderNumber, sum: Decimal) -> Result<Balance>;

    /// All withdrawals of a user, oldest first.
    async fn withdrawals_for_user(&self, user_id: &str) -> Result<Vec<Withdrawal>>;
}

/// Whether an attempt count has hit the ceiling.
pub(crate) fn attempts_exhausted(attempts: u32, max_attempts: Option<u32>) -> bool {
    matches!(max_attempts, Some(max) if max > 0 && attempts >= max)
}

/// Decode a stored status string.
pub(crate) fn parse_status(raw: &str) -> Result<crate::models::OrderStatus> {
    raw.parse().map_err(StorageError::Corrupt)
}

/// Decode a stored order number.
pub(crate) fn parse_number(raw: i64) -> Result<OrderNumber> {
    OrderNumber::new(raw).map_err(|e| StorageError::Corrupt(e.to_string()))
}

/// Reject zero and negative withdrawal sums.
pub(crate) fn ensure_positive(sum: Decimal) -> Result<()> {
    if sum <= Decimal::ZERO {
        return Err(StorageError::InvalidAmount(sum));
    }
    Ok(())
}

/// Initialize the order store based on configuration.
pub async fn init_storage(
    config: &StorageConfig,
) -> std::result::Result<Arc<dyn OrderStore>, Box<dyn std::error::Error>> {
    match config.storage_type.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            info!(path = %config.path, "Storage: sqlite");
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let url = format!("sqlite:{}?mode=rwc", config.path);
            let pool = crate::utils::bootstrap::connect_with_retry("sqlite", &config.path, || {
                sqlx::SqlitePool::connect(&url)
            })
            .await?;

            let store = SqliteOrderStore::new(pool);
            store.init().await?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        "postgres" => {
            info!("Storage: postgres");
            let uri = config
                .uri
                .as_deref()
                .ok_or("postgres storage requires storage.uri")?;

            let pool = crate::utils::bootstrap::connect_with_retry("postgres", "storage.uri", || {
                sqlx::PgPool::connect(uri)
            })
            .await?;

            let store = PostgresOrderStore::new(pool);
            store.init().await?;
            Ok(Arc::new(store))
        }
        other => {
            error!(storage_type = %other, "Unknown or disabled storage type");
            Err(format!("Unknown or disabled storage type: {}", other).into())
        }
    }
}
