//! Reconciliation pipeline tuning.

use std::time::Duration;

use serde::Deserialize;

/// Default worker pool size.
pub const DEFAULT_WORKERS: usize = 500;
/// Default capacity of the work and persistence channels.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default attempt ceiling before an order is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1000;

/// Pipeline configuration.
///
/// Periods are in milliseconds. Zero values are treated as one so a
/// misconfigured ticker never spins.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of concurrent oracle workers. Also the discovery batch size.
    pub workers: usize,
    /// Discovery period.
    pub dispatch_interval_ms: u64,
    /// Persistence flush period.
    pub flush_interval_ms: u64,
    /// Capacity of each bounded channel.
    pub queue_capacity: usize,
    /// Non-final round trips before dead-lettering. 0 disables the ceiling.
    pub max_attempts: u32,
    /// Pause applied on 429 when the reply carries no `Retry-After`.
    pub throttle_backoff_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            dispatch_interval_ms: 1000,
            flush_interval_ms: 1000,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            throttle_backoff_ms: 1000,
        }
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    pub fn capacity(&self) -> usize {
        self.queue_capacity.max(1)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms.max(1))
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms.max(1))
    }

    pub fn throttle_backoff(&self) -> Duration {
        Duration::from_millis(self.throttle_backoff_ms)
    }

    /// Attempt ceiling, `None` when unlimited.
    pub fn attempt_ceiling(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }

    /// Config with short periods for tests.
    pub fn for_test() -> Self {
        Self {
            workers: 4,
            dispatch_interval_ms: 20,
            flush_interval_ms: 20,
            queue_capacity: 16,
            max_attempts: 0,
            throttle_backoff_ms: 50,
        }
    }
}
