//! SQLite OrderStore implementation.
//!
//! Every write runs inside `BEGIN IMMEDIATE`, which takes the database write
//! lock up front. Read-modify-write of a balance row is therefore serialized
//! against every other writer, including the request handlers.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_query::{Expr, OnConflict, Order as SortOrder, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::debug;

use super::schema::{sqlite_timestamp, Orders, UserBalances, Withdrawals, SQLITE_SCHEMA};
use super::{
    attempts_exhausted, ensure_positive, parse_number, parse_status, ApplyOutcome,
    AttemptOutcome, OrderStore, Result, StorageError,
};
use crate::models::{
    AccrualStatus, Balance, Order, OrderNumber, OrderStatus, Verdict, Withdrawal,
};

/// SQLite implementation of OrderStore.
pub struct SqliteOrderStore {
    pool: SqlitePool,
}

impl SqliteOrderStore {
    /// Create a new SQLite order store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        for statement in SQLITE_SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Start a write transaction on a dedicated connection.
    async fn begin(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    /// Commit on success, roll back on failure.
    async fn finish<T>(conn: &mut SqliteConnection, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(value)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(e)
            }
        }
    }

    fn order_columns() -> [Orders; 6] {
        [
            Orders::Number,
            Orders::UserId,
            Orders::Status,
            Orders::Accrual,
            Orders::UploadedAt,
            Orders::Attempts,
        ]
    }

    fn order_from_row(row: &SqliteRow) -> Result<Order> {
        let attempts: i64 = row.try_get("attempts")?;
        Ok(Order {
            number: parse_number(row.try_get("number")?)?,
            user_id: row.try_get("user_id")?,
            status: parse_status(&row.try_get::<String, _>("status")?)?,
            accrual: parse_decimal(&row.try_get::<String, _>("accrual")?)?,
            uploaded_at: parse_timestamp(&row.try_get::<String, _>("uploaded_at")?)?,
            attempts: attempts.max(0) as u32,
        })
    }

    async fn read_balance(conn: &mut SqliteConnection, user_id: &str) -> Result<Balance> {
        let query = Query::select()
            .columns([UserBalances::Current, UserBalances::Withdrawn])
            .from(UserBalances::Table)
            .and_where(Expr::col(UserBalances::UserId).eq(user_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;

        match row {
            Some(row) => Ok(Balance::new(
                parse_decimal(&row.try_get::<String, _>("current")?)?,
                parse_decimal(&row.try_get::<String, _>("withdrawn")?)?,
            )),
            None => Ok(Balance::default()),
        }
    }

    async fn write_balance(
        conn: &mut SqliteConnection,
        user_id: &str,
        balance: &Balance,
    ) -> Result<()> {
        let query = Query::insert()
            .into_table(UserBalances::Table)
            .columns([
                UserBalances::UserId,
                UserBalances::Current,
                UserBalances::Withdrawn,
            ])
            .values_panic([
                user_id.into(),
                balance.current.to_string().into(),
                balance.withdrawn.to_string().into(),
            ])
            .on_conflict(
                OnConflict::column(UserBalances::UserId)
                    .update_columns([UserBalances::Current, UserBalances::Withdrawn])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&mut *conn).await?;
        Ok(())
    }

    async fn owner_and_status(
        conn: &mut SqliteConnection,
        number: OrderNumber,
    ) -> Result<Option<(String, OrderStatus, u32)>> {
        let query = Query::select()
            .columns([Orders::UserId, Orders::Status, Orders::Attempts])
            .from(Orders::Table)
            .and_where(Expr::col(Orders::Number).eq(number.as_i64()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&mut *conn).await?;

        match row {
            Some(row) => {
                let attempts: i64 = row.try_get("attempts")?;
                Ok(Some((
                    row.try_get("user_id")?,
                    parse_status(&row.try_get::<String, _>("status")?)?,
                    attempts.max(0) as u32,
                )))
            }
            None => Ok(None),
        }
    }

    async fn apply_locked(conn: &mut SqliteConnection, verdict: &Verdict) -> Result<ApplyOutcome> {
        let (user_id, status, _) = Self::owner_and_status(conn, verdict.order)
            .await?
            .ok_or(StorageError::OrderNotFound(verdict.order))?;

        if status.is_terminal() {
            return Ok(ApplyOutcome::AlreadyFinal);
        }

        let update = Query::update()
            .table(Orders::Table)
            .values([
                (Orders::Status, verdict.status.order_status().as_str().into()),
                (Orders::Accrual, verdict.accrual.to_string().into()),
            ])
            .and_where(Expr::col(Orders::Number).eq(verdict.order.as_i64()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&update).execute(&mut *conn).await?;

        if verdict.status == AccrualStatus::Processed && verdict.accrual > Decimal::ZERO {
            let mut balance = Self::read_balance(conn, &user_id).await?;
            balance.current += verdict.accrual;
            Self::write_balance(conn, &user_id, &balance).await?;
        }

        Ok(ApplyOutcome::Applied)
    }

    async fn attempt_locked(
        conn: &mut SqliteConnection,
        number: OrderNumber,
        max_attempts: Option<u32>,
    ) -> Result<AttemptOutcome> {
        let (_, status, attempts) = Self::owner_and_status(conn, number)
            .await?
            .ok_or(StorageError::OrderNotFound(number))?;

        if status.is_terminal() {
            return Ok(AttemptOutcome::AlreadyFinal);
        }

        let attempts = attempts.saturating_add(1);
        let exhausted = attempts_exhausted(attempts, max_attempts);
        let status = if exhausted {
            OrderStatus::DeadLetter
        } else {
            status
        };

        let update = Query::update()
            .table(Orders::Table)
            .values([
                (Orders::Attempts, attempts.into()),
                (Orders::Status, status.as_str().into()),
            ])
            .and_where(Expr::col(Orders::Number).eq(number.as_i64()))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&update).execute(&mut *conn).await?;

        if exhausted {
            Ok(AttemptOutcome::DeadLettered { attempts })
        } else {
            Ok(AttemptOutcome::Counted { attempts })
        }
    }

    async fn submit_locked(
        conn: &mut SqliteConnection,
        user_id: &str,
        number: OrderNumber,
    ) -> Result<Order> {
        if let Some((owner, _, _)) = Self::owner_and_status(conn, number).await? {
            return Err(if owner == user_id {
                StorageError::AlreadySubmitted(number)
            } else {
                StorageError::OwnedByAnotherUser(number)
            });
        }

        let order = Order::new(number, user_id);
        let insert = Query::insert()
            .into_table(Orders::Table)
            .columns(Self::order_columns())
            .values_panic([
                order.number.as_i64().into(),
                order.user_id.clone().into(),
                order.status.as_str().into(),
                order.accrual.to_string().into(),
                sqlite_timestamp(&order.uploaded_at).into(),
                order.attempts.into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&insert).execute(&mut *conn).await?;
        Ok(order)
    }

    async fn withdraw_locked(
        conn: &mut SqliteConnection,
        user_id: &str,
        order: OrderNumber,
        sum: Decimal,
    ) -> Result<Balance> {
        let existing = Query::select()
            .column(Withdrawals::Number)
            .from(Withdrawals::Table)
            .and_where(Expr::col(Withdrawals::Number).eq(order.as_i64()))
            .to_string(SqliteQueryBuilder);

        if sqlx::query(&existing)
            .fetch_optional(&mut *conn)
            .await?
            .is_some()
        {
            return Err(StorageError::DuplicateWithdrawal(order));
        }

        let mut balance = Self::read_balance(conn, user_id).await?;
        if balance.current < sum {
            return Err(StorageError::InsufficientFunds {
                requested: sum,
                available: balance.current,
            });
        }
        balance.current -= sum;
        balance.withdrawn += sum;
        Self::write_balance(conn, user_id, &balance).await?;

        let insert = Query::insert()
            .into_table(Withdrawals::Table)
            .columns([
                Withdrawals::Number,
                Withdrawals::UserId,
                Withdrawals::Sum,
                Withdrawals::ProcessedAt,
            ])
            .values_panic([
                order.as_i64().into(),
                user_id.into(),
                sum.to_string().into(),
                sqlite_timestamp(&Utc::now()).into(),
            ])
            .to_string(SqliteQueryBuilder);

        sqlx::query(&insert).execute(&mut *conn).await?;
        Ok(balance)
    }
}

#[async_trait]
impl OrderStore for SqliteOrderStore {
    async fn list_pending(&self, limit: usize) -> Result<Vec<Order>> {
        let query = Query::select()
            .columns(Self::order_columns())
            .from(Orders::Table)
            .and_where(
                Expr::col(Orders::Status).is_in(OrderStatus::PENDING.iter().map(|s| s.as_str())),
            )
            .order_by(Orders::UploadedAt, SortOrder::Asc)
            .order_by(Orders::Number, SortOrder::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::order_from_row).collect()
    }

    async fn apply_verdict(&self, verdict: &Verdict) -> Result<ApplyOutcome> {
        let mut conn = self.begin().await?;
        let result = Self::apply_locked(&mut conn, verdict).await;
        let outcome = Self::finish(&mut conn, result).await?;

        debug!(order = %verdict.order, status = %verdict.status, ?outcome, "Verdict written");
        Ok(outcome)
    }

    async fn record_attempt(
        &self,
        number: OrderNumber,
        max_attempts: Option<u32>,
    ) -> Result<AttemptOutcome> {
        let mut conn = self.begin().await?;
        let result = Self::attempt_locked(&mut conn, number, max_attempts).await;
        Self::finish(&mut conn, result).await
    }

    async fn submit_order(&self, user_id: &str, number: OrderNumber) -> Result<Order> {
        let mut conn = self.begin().await?;
        let result = Self::submit_locked(&mut conn, user_id, number).await;
        Self::finish(&mut conn, result).await
    }

    async fn get_order(&self, number: OrderNumber) -> Result<Option<Order>> {
        let query = Query::select()
            .columns(Self::order_columns())
            .from(Orders::Table)
            .and_where(Expr::col(Orders::Number).eq(number.as_i64()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(Self::order_from_row).transpose()
    }

    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let query = Query::select()
            .columns(Self::order_columns())
            .from(Orders::Table)
            .and_where(Expr::col(Orders::UserId).eq(user_id))
            .order_by(Orders::UploadedAt, SortOrder::Desc)
            .order_by(Orders::Number, SortOrder::Desc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::order_from_row).collect()
    }

    async fn balance(&self, user_id: &str) -> Result<Balance> {
        let mut conn = self.pool.acquire().await?;
        Self::read_balance(&mut conn, user_id).await
    }

    async fn withdraw(&self, user_id: &str, order: OrderNumber, sum: Decimal) -> Result<Balance> {
        ensure_positive(sum)?;

        let mut conn = self.begin().await?;
        let result = Self::withdraw_locked(&mut conn, user_id, order, sum).await;
        Self::finish(&mut conn, result).await
    }

    async fn withdrawals_for_user(&self, user_id: &str) -> Result<Vec<Withdrawal>> {
        let query = Query::select()
            .columns([
                Withdrawals::Number,
                Withdrawals::UserId,
                Withdrawals::Sum,
                Withdrawals::ProcessedAt,
            ])
            .from(Withdrawals::Table)
            .and_where(Expr::col(Withdrawals::UserId).eq(user_id))
            .order_by(Withdrawals::ProcessedAt, SortOrder::Asc)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut withdrawals = Vec::with_capacity(rows.len());
        for row in rows {
            withdrawals.push(Withdrawal {
                order: parse_number(row.try_get("number")?)?,
                user_id: row.try_get("user_id")?,
                sum: parse_decimal(&row.try_get::<String, _>("sum")?)?,
                processed_at: parse_timestamp(&row.try_get::<String, _>("processed_at")?)?,
            });
        }

        Ok(withdrawals)
    }
}

fn parse_decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw).map_err(|e| StorageError::Corrupt(format!("amount {raw:?}: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("timestamp {raw:?}: {e}")))
}
