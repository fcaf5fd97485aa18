//! Order-accrual reconciliation pipeline.
//!
//! ```text
//! Dispatcher --work channel--> Workers --persist channel--> Persister --> OrderStore
//! ```
//!
//! The dispatcher scans the store for pending orders on one ticker, the
//! persister writes accumulated verdicts on another. Both channels are
//! bounded, so a slow oracle or a slow store throttles discovery instead of
//! growing memory. An order is claimed in the in-flight registry from
//! dispatch until its result is written or dropped, which keeps it out of
//! later scans in the meantime.

mod dispatch;
mod inflight;
mod persister;
mod stats;
mod throttle;
mod worker;

pub use inflight::InFlight;
pub use stats::StatsSnapshot;
pub use throttle::ThrottleGate;

use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::models::{OrderNumber, Verdict};
use crate::oracle::AccrualOracle;
use crate::storage::OrderStore;

use dispatch::Dispatcher;
use persister::Persister;
use stats::PipelineStats;
use worker::Worker;

/// A worker result waiting for the persister.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistItem {
    /// Oracle verdict to apply.
    Verdict(Verdict),
    /// Round trip without a verdict (204 or transient failure).
    Attempt(OrderNumber),
}

impl PersistItem {
    pub fn order(&self) -> OrderNumber {
        match self {
            PersistItem::Verdict(verdict) => verdict.order,
            PersistItem::Attempt(number) => *number,
        }
    }
}

/// Resolves once shutdown is requested or the handle is dropped.
pub(crate) async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Assembles the pipeline around an explicit store and oracle.
pub struct AccrualPipeline {
    store: Arc<dyn OrderStore>,
    oracle: Arc<dyn AccrualOracle>,
    config: PipelineConfig,
}

impl AccrualPipeline {
    pub fn new(
        store: Arc<dyn OrderStore>,
        oracle: Arc<dyn AccrualOracle>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            oracle,
            config,
        }
    }

    /// Start the dispatcher, the worker pool, and the persister.
    pub fn spawn(self) -> PipelineHandle {
        let workers = self.config.worker_count();
        let capacity = self.config.capacity();
        let max_attempts = self.config.attempt_ceiling();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (work_tx, work_rx) = mpsc::channel(capacity);
        let (persist_tx, persist_rx) = mpsc::channel(capacity);

        let inflight = InFlight::new();
        let throttle = Arc::new(ThrottleGate::new());
        let stats = Arc::new(PipelineStats::default());

        let mut tasks = Vec::with_capacity(workers + 1);

        let dispatcher = Dispatcher {
            store: self.store.clone(),
            work_tx,
            inflight: inflight.clone(),
            stats: stats.clone(),
            interval: self.config.dispatch_interval(),
            batch_size: workers,
        };
        tasks.push(tokio::spawn(dispatcher.run(shutdown_rx.clone())));

        let work_rx = Arc::new(Mutex::new(work_rx));
        for id in 0..workers {
            let worker = Worker {
                id,
                oracle: self.oracle.clone(),
                work_rx: work_rx.clone(),
                persist_tx: persist_tx.clone(),
                inflight: inflight.clone(),
                throttle: throttle.clone(),
                stats: stats.clone(),
                throttle_backoff: self.config.throttle_backoff(),
                count_attempts: max_attempts.is_some(),
            };
            tasks.push(tokio::spawn(worker.run(shutdown_rx.clone())));
        }
        // The persister exits once the last worker drops its sender.
        drop(persist_tx);

        let persister = Persister {
            store: self.store,
            persist_rx,
            inflight: inflight.clone(),
            stats: stats.clone(),
            interval: self.config.flush_interval(),
            max_attempts,
        };
        let persister = tokio::spawn(persister.run());

        info!(
            workers,
            capacity,
            dispatch_interval_ms = self.config.dispatch_interval_ms,
            flush_interval_ms = self.config.flush_interval_ms,
            max_attempts = ?max_attempts,
            "Accrual pipeline started"
        );

        PipelineHandle {
            shutdown: shutdown_tx,
            tasks,
            persister,
            stats,
            inflight,
        }
    }
}

/// Handle to a running pipeline.
///
/// Dropping the handle without calling `shutdown` also stops the tasks,
/// but nothing waits for the final flush.
pub struct PipelineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    persister: JoinHandle<()>,
    stats: Arc<PipelineStats>,
    inflight: InFlight,
}

impl PipelineHandle {
    /// Stop discovery and the workers, then wait for the persister's final flush.
    pub async fn shutdown(self) {
        info!("Stopping accrual pipeline");
        let _ = self.shutdown.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Pipeline task ended abnormally");
            }
        }
        if let Err(e) = self.persister.await {
            warn!(error = %e, "Persister ended abnormally");
        }

        info!("Accrual pipeline stopped");
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Orders currently claimed by the pipeline.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}
