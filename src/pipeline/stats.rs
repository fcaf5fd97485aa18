//! Pipeline counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by every pipeline task.
#[derive(Debug, Default)]
pub(crate) struct PipelineStats {
    pub ticks: AtomicU64,
    pub discovery_failures: AtomicU64,
    pub dispatched: AtomicU64,
    pub verdicts: AtomicU64,
    pub not_ready: AtomicU64,
    pub throttled: AtomicU64,
    pub oracle_errors: AtomicU64,
    pub applied: AtomicU64,
    pub already_final: AtomicU64,
    pub apply_failures: AtomicU64,
    pub dead_lettered: AtomicU64,
}

impl PipelineStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let read = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            ticks: read(&self.ticks),
            discovery_failures: read(&self.discovery_failures),
            dispatched: read(&self.dispatched),
            verdicts: read(&self.verdicts),
            not_ready: read(&self.not_ready),
            throttled: read(&self.throttled),
            oracle_errors: read(&self.oracle_errors),
            applied: read(&self.applied),
            already_final: read(&self.already_final),
            apply_failures: read(&self.apply_failures),
            dead_lettered: read(&self.dead_lettered),
        }
    }
}

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Discovery ticks run, failed ones included.
    pub ticks: u64,
    pub discovery_failures: u64,
    /// Orders handed to the worker pool.
    pub dispatched: u64,
    /// 200 replies with a verdict, final or not.
    pub verdicts: u64,
    pub not_ready: u64,
    pub throttled: u64,
    pub oracle_errors: u64,
    /// Verdicts written to the store.
    pub applied: u64,
    /// Verdicts skipped because the order was already terminal.
    pub already_final: u64,
    /// Verdict or attempt writes that failed.
    pub apply_failures: u64,
    pub dead_lettered: u64,
}
