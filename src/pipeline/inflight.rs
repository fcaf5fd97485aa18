//! Orders currently between dispatch and a settled write.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::OrderNumber;

/// Set of order numbers owned by the pipeline.
///
/// The dispatcher claims an order before queueing it; the worker or the
/// persister releases it once the order is free to be scanned again.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    orders: Arc<Mutex<HashSet<OrderNumber>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the order is already claimed.
    pub fn claim(&self, number: OrderNumber) -> bool {
        self.lock().insert(number)
    }

    pub fn release(&self, number: OrderNumber) {
        self.lock().remove(&number);
    }

    pub fn contains(&self, number: OrderNumber) -> bool {
        self.lock().contains(&number)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<OrderNumber>> {
        self.orders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
