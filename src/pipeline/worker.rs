//! Worker pool: one oracle round trip per dispatched order.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use super::inflight::InFlight;
use super::stats::PipelineStats;
use super::throttle::ThrottleGate;
use super::{shutdown_requested, PersistItem};
use crate::models::{Order, OrderNumber};
use crate::oracle::{AccrualOracle, OracleReply};

/// Work receiver shared by every worker.
pub(crate) type SharedReceiver = Arc<Mutex<mpsc::Receiver<Order>>>;

pub(crate) struct Worker {
    pub id: usize,
    pub oracle: Arc<dyn AccrualOracle>,
    pub work_rx: SharedReceiver,
    pub persist_tx: mpsc::Sender<PersistItem>,
    pub inflight: InFlight,
    pub throttle: Arc<ThrottleGate>,
    pub stats: Arc<PipelineStats>,
    pub throttle_backoff: Duration,
    pub count_attempts: bool,
}

impl Worker {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let next = tokio::select! {
                order = Self::next_order(&self.work_rx) => order,
                _ = shutdown_requested(&mut shutdown) => None,
            };

            let Some(order) = next else {
                break;
            };

            let number = order.number;
            let finished = tokio::select! {
                _ = self.handle(number) => true,
                _ = shutdown_requested(&mut shutdown) => false,
            };

            if !finished {
                self.inflight.release(number);
                break;
            }
        }

        debug!(worker = self.id, "Worker stopped");
    }

    async fn next_order(work_rx: &SharedReceiver) -> Option<Order> {
        work_rx.lock().await.recv().await
    }

    /// Ask the oracle about one order and route the outcome.
    pub async fn handle(&self, number: OrderNumber) {
        self.throttle.wait().await;

        match self.oracle.fetch_verdict(number).await {
            Ok(OracleReply::Verdict(verdict)) => {
                PipelineStats::incr(&self.stats.verdicts);
                debug!(order = %number, status = %verdict.status, accrual = %verdict.accrual, "Verdict received");
                self.persist(PersistItem::Verdict(verdict)).await;
            }
            Ok(OracleReply::NotReady) => {
                PipelineStats::incr(&self.stats.not_ready);
                debug!(order = %number, "Order not yet registered with accrual service");
                self.unsettled(number).await;
            }
            Ok(OracleReply::Throttled { retry_after }) => {
                PipelineStats::incr(&self.stats.throttled);
                let pause = retry_after.unwrap_or(self.throttle_backoff);
                if self.throttle.engage(pause) {
                    info!(?pause, "Accrual service throttled, pausing workers");
                } else {
                    debug!(order = %number, ?pause, "Throttled");
                }
                self.inflight.release(number);
            }
            Err(e) => {
                PipelineStats::incr(&self.stats.oracle_errors);
                warn!(order = %number, error = %e, "Accrual request failed");
                self.unsettled(number).await;
            }
        }
    }

    /// No verdict this round: count the attempt or free the order for the next scan.
    async fn unsettled(&self, number: OrderNumber) {
        if self.count_attempts {
            self.persist(PersistItem::Attempt(number)).await;
        } else {
            self.inflight.release(number);
        }
    }

    async fn persist(&self, item: PersistItem) {
        let number = item.order();
        if self.persist_tx.send(item).await.is_err() {
            warn!(order = %number, "Persister gone, dropping result");
            self.inflight.release(number);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Verdict;
    use crate::oracle::{Scripted, ScriptedOracle};
    use rust_decimal_macros::dec;

    struct Harness {
        worker: Worker,
        oracle: Arc<ScriptedOracle>,
        persist_rx: mpsc::Receiver<PersistItem>,
    }

    fn harness(count_attempts: bool) -> Harness {
        let oracle = Arc::new(ScriptedOracle::new());
        let (_work_tx, work_rx) = mpsc::channel(4);
        let (persist_tx, persist_rx) = mpsc::channel(4);
        let worker = Worker {
            id: 0,
            oracle: oracle.clone(),
            work_rx: Arc::new(Mutex::new(work_rx)),
            persist_tx,
            inflight: InFlight::new(),
            throttle: Arc::new(ThrottleGate::new()),
            stats: Arc::new(PipelineStats::default()),
            throttle_backoff: Duration::from_millis(200),
            count_attempts,
        };
        Harness {
            worker,
            oracle,
            persist_rx,
        }
    }

    fn number() -> OrderNumber {
        OrderNumber::new(79927398713).unwrap()
    }

    #[tokio::test]
    async fn test_verdict_is_forwarded() {
        let mut h = harness(false);
        let verdict = Verdict::processed(number(), dec!(500));
        h.oracle
            .push(number(), Scripted::Reply(OracleReply::Verdict(verdict.clone())));
        h.worker.inflight.claim(number());

        h.worker.handle(number()).await;

        assert_eq!(
            h.persist_rx.try_recv().unwrap(),
            PersistItem::Verdict(verdict)
        );
        assert!(h.worker.inflight.contains(number()));
    }

    #[tokio::test]
    async fn test_not_ready_releases_without_ceiling() {
        let mut h = harness(false);
        h.worker.inflight.claim(number());

        h.worker.handle(number()).await;

        assert!(h.persist_rx.try_recv().is_err());
        assert!(!h.worker.inflight.contains(number()));
        assert_eq!(h.worker.stats.snapshot().not_ready, 1);
    }

    #[tokio::test]
    async fn test_failure_counts_attempt_with_ceiling() {
        let mut h = harness(true);
        h.oracle.push(number(), Scripted::Fail(500));
        h.worker.inflight.claim(number());

        h.worker.handle(number()).await;

        assert_eq!(
            h.persist_rx.try_recv().unwrap(),
            PersistItem::Attempt(number())
        );
        assert_eq!(h.worker.stats.snapshot().oracle_errors, 1);
    }

    #[tokio::test]
    async fn test_throttle_engages_gate_and_is_not_an_attempt() {
        let mut h = harness(true);
        h.oracle.push(
            number(),
            Scripted::Reply(OracleReply::Throttled { retry_after: None }),
        );
        h.worker.inflight.claim(number());

        h.worker.handle(number()).await;

        assert!(h.persist_rx.try_recv().is_err());
        assert!(!h.worker.inflight.contains(number()));
        assert!(h.worker.throttle.is_engaged());
        assert_eq!(h.worker.stats.snapshot().throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_retry_after_releases_order() {
        let h = harness(true);
        h.oracle.push(
            number(),
            Scripted::Reply(OracleReply::Throttled {
                retry_after: Some(Duration::from_secs(u64::MAX)),
            }),
        );
        h.worker.inflight.claim(number());

        let worker = Arc::new(h.worker);
        let task = tokio::spawn({
            let worker = worker.clone();
            async move { worker.handle(number()).await }
        });

        assert!(task.await.is_ok());
        assert!(!worker.inflight.contains(number()));
        assert!(worker.throttle.is_engaged());
        assert_eq!(worker.stats.snapshot().throttled, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_at_gate_before_calling() {
        let h = harness(false);
        h.worker.throttle.engage(Duration::from_secs(3));

        let start = tokio::time::Instant::now();
        h.worker.handle(number()).await;

        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(h.oracle.calls(number()), 1);
    }
}
