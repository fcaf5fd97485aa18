//! PostgreSQL OrderStore implementation.
//!
//! Order rows are locked with `SELECT ... FOR UPDATE` for the duration of a
//! verdict or attempt write. Balance changes are arithmetic updates so that
//! concurrent withdrawals from the request side never lose an increment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_query::{Expr, LockType, Order as SortOrder, PostgresQueryBuilder, Query};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

use super::schema::{Orders, UserBalances, Withdrawals, POSTGRES_SCHEMA};
use super::{
    attempts_exhausted, ensure_positive, parse_number, parse_status, ApplyOutcome,
    AttemptOutcome, OrderStore, Result, StorageError,
};
use crate::models::{
    AccrualStatus, Balance, Order, OrderNumber, OrderStatus, Verdict, Withdrawal,
};

/// PostgreSQL implementation of OrderStore.
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Create a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        for statement in POSTGRES_SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
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

    fn order_from_row(row: &PgRow) -> Result<Order> {
        let attempts: i32 = row.try_get("attempts")?;
        Ok(Order {
            number: parse_number(row.try_get("number")?)?,
            user_id: row.try_get("user_id")?,
            status: parse_status(&row.try_get::<String, _>("status")?)?,
            accrual: row.try_get("accrual")?,
            uploaded_at: row.try_get::<DateTime<Utc>, _>("uploaded_at")?,
            attempts: attempts.max(0) as u32,
        })
    }

    /// Lock one order row for the rest of the transaction.
    async fn lock_order(
        conn: &mut PgConnection,
        number: OrderNumber,
    ) -> Result<(String, OrderStatus, u32)> {
        let query = Query::select()
            .columns([Orders::UserId, Orders::Status, Orders::Attempts])
            .from(Orders::Table)
            .and_where(Expr::col(Orders::Number).eq(number.as_i64()))
            .lock(LockType::Update)
            .to_string(PostgresQueryBuilder);

        let row = sqlx::query(&query)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(StorageError::OrderNotFound(number))?;

        let attempts: i32 = row.try_get("attempts")?;
        Ok((
            row.try_get("user_id")?,
            parse_status(&row.try_get::<String, _>("status")?)?,
            attempts.max(0) as u32,
        ))
    }

    async fn read_balance(conn: &mut PgConnection, user_id: &str) -> Result<Balance> {
        let query = Query::select()
            .columns([UserBalances::Current, UserBalances::Withdrawn])
            .from(UserBalances::Table)
            .and_where(Expr::col(UserBalances::UserId).eq(user_id))
            .to_string(PostgresQueryBuilder);

        match sqlx::query(&query).fetch_optional(&mut *conn).await? {
            Some(row) => Ok(Balance::new(
                row.try_get("current")?,
                row.try_get("withdrawn")?,
            )),
            None => Ok(Balance::default()),
        }
    }

    async fn apply_locked(conn: &mut PgConnection, verdict: &Verdict) -> Result<ApplyOutcome> {
        let (user_id, status, _) = Self::lock_order(conn, verdict.order).await?;
        if status.is_terminal() {
            return Ok(ApplyOutcome::AlreadyFinal);
        }

        sqlx::query("UPDATE orders SET status = $1, accrual = $2 WHERE number = $3")
            .bind(verdict.status.order_status().as_str())
            .bind(verdict.accrual)
            .bind(verdict.order.as_i64())
            .execute(&mut *conn)
            .await?;

        if verdict.status == AccrualStatus::Processed && verdict.accrual > Decimal::ZERO {
            sqlx::query(
                "INSERT INTO user_balances (user_id, current, withdrawn) VALUES ($1, $2, 0) \
                 ON CONFLICT (user_id) DO UPDATE SET current = user_balances.current + EXCLUDED.current",
            )
            .bind(&user_id)
            .bind(verdict.accrual)
            .execute(&mut *conn)
            .await?;
        }

        Ok(ApplyOutcome::Applied)
    }

    async fn attempt_locked(
        conn: &mut PgConnection,
        number: OrderNumber,
        max_attempts: Option<u32>,
    ) -> Result<AttemptOutcome> {
        let (_, status, attempts) = Self::lock_order(conn, number).await?;
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

        sqlx::query("UPDATE orders SET attempts = $1, status = $2 WHERE number = $3")
            .bind(i32::try_from(attempts).unwrap_or(i32::MAX))
            .bind(status.as_str())
            .bind(number.as_i64())
            .execute(&mut *conn)
            .await?;

        if exhausted {
            Ok(AttemptOutcome::DeadLettered { attempts })
        } else {
            Ok(AttemptOutcome::Counted { attempts })
        }
    }

    async fn withdraw_locked(
        conn: &mut PgConnection,
        user_id: &str,
        order: OrderNumber,
        sum: Decimal,
    ) -> Result<Balance> {
        let inserted = sqlx::query(
            "INSERT INTO withdrawals (number, user_id, sum, processed_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (number) DO NOTHING",
        )
        .bind(order.as_i64())
        .bind(user_id)
        .bind(sum)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StorageError::DuplicateWithdrawal(order));
        }

        let row = sqlx::query(
            "UPDATE user_balances SET current = current - $2, withdrawn = withdrawn + $2 \
             WHERE user_id = $1 AND current >= $2 RETURNING current, withdrawn",
        )
        .bind(user_id)
        .bind(sum)
        .fetch_optional(&mut *conn)
        .await?;

        match row {
            Some(row) => Ok(Balance::new(
                row.try_get("current")?,
                row.try_get("withdrawn")?,
            )),
            None => {
                let available = Self::read_balance(conn, user_id).await?.current;
                Err(StorageError::InsufficientFunds {
                    requested: sum,
                    available,
                })
            }
        }
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
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
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::order_from_row).collect()
    }

    async fn apply_verdict(&self, verdict: &Verdict) -> Result<ApplyOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::apply_locked(&mut tx, verdict).await?;
        tx.commit().await?;

        debug!(order = %verdict.order, status = %verdict.status, ?outcome, "Verdict written");
        Ok(outcome)
    }

    async fn record_attempt(
        &self,
        number: OrderNumber,
        max_attempts: Option<u32>,
    ) -> Result<AttemptOutcome> {
        let mut tx = self.pool.begin().await?;
        let outcome = Self::attempt_locked(&mut tx, number, max_attempts).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn submit_order(&self, user_id: &str, number: OrderNumber) -> Result<Order> {
        let order = Order::new(number, user_id);

        let inserted = sqlx::query(
            "INSERT INTO orders (number, user_id, status, accrual, uploaded_at, attempts) \
             VALUES ($1, $2, $3, $4, $5, 0) ON CONFLICT (number) DO NOTHING",
        )
        .bind(number.as_i64())
        .bind(user_id)
        .bind(order.status.as_str())
        .bind(order.accrual)
        .bind(order.uploaded_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            let owner = self
                .get_order(number)
                .await?
                .map(|existing| existing.user_id)
                .unwrap_or_default();
            return Err(if owner == user_id {
                StorageError::AlreadySubmitted(number)
            } else {
                StorageError::OwnedByAnotherUser(number)
            });
        }

        Ok(order)
    }

    async fn get_order(&self, number: OrderNumber) -> Result<Option<Order>> {
        let query = Query::select()
            .columns(Self::order_columns())
            .from(Orders::Table)
            .and_where(Expr::col(Orders::Number).eq(number.as_i64()))
            .to_string(PostgresQueryBuilder);

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
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(Self::order_from_row).collect()
    }

    async fn balance(&self, user_id: &str) -> Result<Balance> {
        let mut conn = self.pool.acquire().await?;
        Self::read_balance(&mut conn, user_id).await
    }

    async fn withdraw(&self, user_id: &str, order: OrderNumber, sum: Decimal) -> Result<Balance> {
        ensure_positive(sum)?;

        let mut tx = self.pool.begin().await?;
        let balance = Self::withdraw_locked(&mut tx, user_id, order, sum).await?;
        tx.commit().await?;
        Ok(balance)
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
            .to_string(PostgresQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        let mut withdrawals = Vec::with_capacity(rows.len());
        for row in rows {
            withdrawals.push(Withdrawal {
                order: parse_number(row.try_get("number")?)?,
                user_id: row.try_get("user_id")?,
                sum: row.try_get("sum")?,
                processed_at: row.try_get("processed_at")?,
            });
        }

        Ok(withdrawals)
    }
}
