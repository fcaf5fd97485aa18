//! Scripted oracle for testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{AccrualOracle, OracleError, OracleReply};
use crate::models::OrderNumber;

/// One canned oracle answer.
#[derive(Debug, Clone, PartialEq)]
pub enum Scripted {
    Reply(OracleReply),
    /// Fail with `OracleError::UnexpectedStatus`.
    Fail(u16),
}

/// Replays scripted replies per order, then falls back to a default.
///
/// Also records whether the same order was ever asked about twice at once.
pub struct ScriptedOracle {
    scripts: Mutex<HashMap<OrderNumber, VecDeque<Scripted>>>,
    fallback: Mutex<Scripted>,
    delay: Mutex<Duration>,
    active: Mutex<HashSet<OrderNumber>>,
    calls: Mutex<HashMap<OrderNumber, usize>>,
    total_calls: AtomicUsize,
    overlapped: AtomicBool,
}

impl ScriptedOracle {
    /// Oracle that answers 204 unless told otherwise.
    pub fn new() -> Self {
        Self::with_default(Scripted::Reply(OracleReply::NotReady))
    }

    pub fn with_default(fallback: Scripted) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            fallback: Mutex::new(fallback),
            delay: Mutex::new(Duration::ZERO),
            active: Mutex::new(HashSet::new()),
            calls: Mutex::new(HashMap::new()),
            total_calls: AtomicUsize::new(0),
            overlapped: AtomicBool::new(false),
        }
    }

    /// Queue a reply for one order. Queued replies are used in order.
    pub fn push(&self, number: OrderNumber, reply: Scripted) {
        lock(&self.scripts).entry(number).or_default().push_back(reply);
    }

    /// Reply used once an order's queue is empty.
    pub fn set_default(&self, reply: Scripted) {
        *lock(&self.fallback) = reply;
    }

    /// Hold every call open for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = delay;
    }

    pub fn calls(&self, number: OrderNumber) -> usize {
        lock(&self.calls).get(&number).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Whether two calls for the same order were ever in flight together.
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    fn next_reply(&self, number: OrderNumber) -> Scripted {
        lock(&self.scripts)
            .get_mut(&number)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| lock(&self.fallback).clone())
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccrualOracle for ScriptedOracle {
    async fn fetch_verdict(&self, number: OrderNumber) -> Result<OracleReply, OracleError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.calls).entry(number).or_default() += 1;
        if !lock(&self.active).insert(number) {
            self.overlapped.store(true, Ordering::SeqCst);
        }

        let delay = *lock(&self.delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = self.next_reply(number);
        lock(&self.active).remove(&number);

        match reply {
            Scripted::Reply(reply) => Ok(reply),
            Scripted::Fail(code) => Err(OracleError::UnexpectedStatus(code)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
