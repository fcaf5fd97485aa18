//! Shared pause for all workers after the accrual service answers 429.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Longest pause a single 429 can impose.
pub const MAX_THROTTLE_PAUSE: Duration = Duration::from_secs(60 * 60);

/// Deadline before which no worker may call the oracle.
#[derive(Debug, Default)]
pub struct ThrottleGate {
    until: Mutex<Option<Instant>>,
}

impl ThrottleGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate for at least `pause`, capped at `MAX_THROTTLE_PAUSE`.
    /// Never shortens an existing pause.
    ///
    /// Returns true when the gate was open before this call.
    pub fn engage(&self, pause: Duration) -> bool {
        let now = Instant::now();
        let pause = pause.min(MAX_THROTTLE_PAUSE);
        let deadline = now.checked_add(pause).unwrap_or(now);
        let mut until = self.lock();

        let was_open = until.map_or(true, |current| current <= now);
        if until.map_or(true, |current| current < deadline) {
            *until = Some(deadline);
        }
        was_open
    }

    pub fn is_engaged(&self) -> bool {
        self.deadline().is_some()
    }

    /// Sleep until the gate opens. Returns at once when it is open.
    pub async fn wait(&self) {
        while let Some(deadline) = self.deadline() {
            tokio::time::sleep_until(deadline).await;
        }
    }

    fn deadline(&self) -> Option<Instant> {
        let until = *self.lock();
        until.filter(|deadline| *deadline > Instant::now())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
