//! Batch persister: the single writer between the workers and the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::inflight::InFlight;
use super::stats::PipelineStats;
use super::PersistItem;
use crate::models::{OrderNumber, Verdict};
use crate::storage::{ApplyOutcome, AttemptOutcome, OrderStore};

pub(crate) struct Persister {
    pub store: Arc<dyn OrderStore>,
    pub persist_rx: mpsc::Receiver<PersistItem>,
    pub inflight: InFlight,
    pub stats: Arc<PipelineStats>,
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl Persister {
    /// Accumulate until each tick, flush, repeat. Exits with a final flush
    /// once every sender is gone.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut batch: Vec<PersistItem> = Vec::new();

        loop {
            let received = tokio::select! {
                item = self.persist_rx.recv() => Some(item),
                _ = ticker.tick() => None,
            };

            match received {
                Some(Some(item)) => batch.push(item),
                Some(None) => break,
                None => self.flush(&mut batch).await,
            }
        }

        let remaining = batch.len();
        self.flush(&mut batch).await;
        info!(remaining, "Persister stopped");
    }

    /// Write every accumulated item, one transaction each, then clear the batch.
    pub async fn flush(&self, batch: &mut Vec<PersistItem>) {
        if batch.is_empty() {
            return;
        }

        let count = batch.len();
        for item in batch.drain(..) {
            match &item {
                PersistItem::Verdict(verdict) => self.apply(verdict).await,
                PersistItem::Attempt(number) => self.count_attempt(*number).await,
            }
            self.inflight.release(item.order());
        }

        debug!(count, "Flushed accrual results");
    }

    async fn apply(&self, verdict: &Verdict) {
        match self.store.apply_verdict(verdict).await {
            Ok(ApplyOutcome::Applied) => {
                PipelineStats::incr(&self.stats.applied);
                if verdict.is_final() {
                    info!(
                        order = %verdict.order,
                        status = %verdict.status,
                        accrual = %verdict.accrual,
                        "Order settled"
                    );
                } else {
                    self.count_attempt(verdict.order).await;
                }
            }
            Ok(ApplyOutcome::AlreadyFinal) => {
                PipelineStats::incr(&self.stats.already_final);
                debug!(order = %verdict.order, "Order already settled, verdict ignored");
            }
            Err(e) => {
                PipelineStats::incr(&self.stats.apply_failures);
                warn!(order = %verdict.order, error = %e, "Failed to apply verdict");
                self.count_attempt(verdict.order).await;
            }
        }
    }

    async fn count_attempt(&self, number: OrderNumber) {
        let Some(max_attempts) = self.max_attempts else {
            return;
        };

        match self.store.record_attempt(number, Some(max_attempts)).await {
            Ok(AttemptOutcome::DeadLettered { attempts }) => {
                PipelineStats::incr(&self.stats.dead_lettered);
                warn!(order = %number, attempts, "Order dead-lettered after exhausting attempts");
            }
            Ok(AttemptOutcome::Counted { .. }) | Ok(AttemptOutcome::AlreadyFinal) => {}
            Err(e) => {
                PipelineStats::incr(&self.stats.apply_failures);
                warn!(order = %number, error = %e, "Failed to record attempt");
            }
        }
    }
}
