//! Dispatch loop: periodic discovery of orders awaiting a verdict.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::inflight::InFlight;
use super::stats::PipelineStats;
use super::shutdown_requested;
use crate::models::Order;
use crate::storage::OrderStore;

pub(crate) struct Dispatcher {
    pub store: Arc<dyn OrderStore>,
    pub work_tx: mpsc::Sender<Order>,
    pub inflight: InFlight,
    pub stats: Arc<PipelineStats>,
    pub interval: Duration,
    pub batch_size: usize,
}

impl Dispatcher {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let stop = tokio::select! {
                _ = ticker.tick() => false,
                _ = shutdown_requested(&mut shutdown) => true,
            };

            if stop || !self.tick(&mut shutdown).await {
                break;
            }
        }

        info!("Dispatcher stopped");
    }

    /// One discovery pass. Returns false once the pipeline is stopping.
    async fn tick(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        PipelineStats::incr(&self.stats.ticks);

        let orders = match self.store.list_pending(self.batch_size).await {
            Ok(orders) => orders,
            Err(e) => {
                PipelineStats::incr(&self.stats.discovery_failures);
                warn!(error = %e, "Failed to list pending orders, skipping tick");
                return true;
            }
        };

        if orders.is_empty() {
            return true;
        }

        let mut queued = 0usize;
        for order in orders {
            let number = order.number;
            if !self.inflight.claim(number) {
                continue;
            }

            let sent = tokio::select! {
                result = self.work_tx.send(order) => result.is_ok(),
                _ = shutdown_requested(shutdown) => false,
            };

            if !sent {
                self.inflight.release(number);
                return false;
            }

            PipelineStats::incr(&self.stats.dispatched);
            queued += 1;
        }

        debug!(queued, "Dispatched pending orders");
        true
    }
}
