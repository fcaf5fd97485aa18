//! Mock storage implementation for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::{
    attempts_exhausted, ensure_positive, ApplyOutcome, AttemptOutcome, OrderStore, Result,
    StorageError,
};
use crate::models::{
    AccrualStatus, Balance, Order, OrderNumber, OrderStatus, Verdict, Withdrawal,
};

#[derive(Default)]
struct State {
    orders: HashMap<OrderNumber, Order>,
    balances: HashMap<String, Balance>,
    withdrawals: Vec<Withdrawal>,
}

/// Mock order store that keeps everything in memory.
///
/// A single lock around all tables gives the same all-or-nothing writes the
/// SQL backends get from transactions.
#[derive(Default)]
pub struct MockOrderStore {
    state: RwLock<State>,
    fail_on_list: RwLock<bool>,
    fail_on_apply: RwLock<bool>,
    list_calls: AtomicUsize,
    apply_calls: AtomicUsize,
}

impl MockOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_on_list(&self, fail: bool) {
        *self.fail_on_list.write().await = fail;
    }

    pub async fn set_fail_on_apply(&self, fail: bool) {
        *self.fail_on_apply.write().await = fail;
    }

    /// Insert an order as-is, bypassing submission checks.
    pub async fn insert_order(&self, order: Order) {
        self.state.write().await.orders.insert(order.number, order);
    }

    /// Number of `list_pending` calls, failed ones included.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Number of `apply_verdict` calls, failed ones included.
    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    fn injected_failure() -> StorageError {
        StorageError::Database(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl OrderStore for MockOrderStore {
    async fn list_pending(&self, limit: usize) -> Result<Vec<Order>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_list.read().await {
            return Err(Self::injected_failure());
        }

        let state = self.state.read().await;
        let mut pending: Vec<Order> = state
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect();
        pending.sort_by_key(|o| (o.uploaded_at, o.number));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn apply_verdict(&self, verdict: &Verdict) -> Result<ApplyOutcome> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_on_apply.read().await {
            return Err(Self::injected_failure());
        }

        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&verdict.order)
            .ok_or(StorageError::OrderNotFound(verdict.order))?;

        if order.status.is_terminal() {
            return Ok(ApplyOutcome::AlreadyFinal);
        }

        order.status = verdict.status.order_status();
        order.accrual = verdict.accrual;
        let user_id = order.user_id.clone();

        if verdict.status == AccrualStatus::Processed && verdict.accrual > Decimal::ZERO {
            state.balances.entry(user_id).or_default().current += verdict.accrual;
        }

        Ok(ApplyOutcome::Applied)
    }

    async fn record_attempt(
        &self,
        number: OrderNumber,
        max_attempts: Option<u32>,
    ) -> Result<AttemptOutcome> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(&number)
            .ok_or(StorageError::OrderNotFound(number))?;

        if order.status.is_terminal() {
            return Ok(AttemptOutcome::AlreadyFinal);
        }

        order.attempts = order.attempts.saturating_add(1);
        if attempts_exhausted(order.attempts, max_attempts) {
            order.status = OrderStatus::DeadLetter;
            return Ok(AttemptOutcome::DeadLettered {
                attempts: order.attempts,
            });
        }

        Ok(AttemptOutcome::Counted {
            attempts: order.attempts,
        })
    }

    async fn submit_order(&self, user_id: &str, number: OrderNumber) -> Result<Order> {
        let mut state = self.state.write().await;
        if let Some(existing) = state.orders.get(&number) {
            return Err(if existing.user_id == user_id {
                StorageError::AlreadySubmitted(number)
            } else {
                StorageError::OwnedByAnotherUser(number)
            });
        }

        let order = Order::new(number, user_id);
        state.orders.insert(number, order.clone());
        Ok(order)
    }

    async fn get_order(&self, number: OrderNumber) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&number).cloned())
    }

    async fn orders_for_user(&self, user_id: &str) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by_key(|o| std::cmp::Reverse((o.uploaded_at, o.number)));
        Ok(orders)
    }

    async fn balance(&self, user_id: &str) -> Result<Balance> {
        Ok(self
            .state
            .read()
            .await
            .balances
            .get(user_id)
            .copied()
            .unwrap_or_default())
    }

    async fn withdraw(&self, user_id: &str, order: OrderNumber, sum: Decimal) -> Result<Balance> {
        ensure_positive(sum)?;

        let mut state = self.state.write().await;
        if state.withdrawals.iter().any(|w| w.order == order) {
            return Err(StorageError::DuplicateWithdrawal(order));
        }

        let balance = state.balances.entry(user_id.to_string()).or_default();
        if balance.current < sum {
            return Err(StorageError::InsufficientFunds {
                requested: sum,
                available: balance.current,
            });
        }
        balance.current -= sum;
        balance.withdrawn += sum;
        let updated = *balance;

        state.withdrawals.push(Withdrawal {
            order,
            user_id: user_id.to_string(),
            sum,
            processed_at: Utc::now(),
        });

        Ok(updated)
    }

    async fn withdrawals_for_user(&self, user_id: &str) -> Result<Vec<Withdrawal>> {
        Ok(self
            .state
            .read()
            .await
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}
