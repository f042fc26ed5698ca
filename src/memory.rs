//! Byte budget shared by producer threads and the dispatch thread.
//!
//! Producers calling [`Event::async_go`](crate::event::Event::async_go) on a
//! channel that has a budget block until the bytes currently in flight drop
//! below the threshold. The lease taken for a message is returned when the
//! message leaves the stack (route exhausted, `discard_all`, or drop).

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct MemoryBudget {
    used: Mutex<usize>,
    below_threshold: Condvar,
    threshold: usize,
}

impl MemoryBudget {
    pub fn new(threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            used: Mutex::new(0),
            below_threshold: Condvar::new(),
            threshold,
        })
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Bytes currently leased.
    pub fn used(&self) -> usize {
        *self.used.lock()
    }

    /// Leases `bytes`, blocking while the budget is at or above its
    /// threshold. A single lease may overshoot the threshold.
    pub fn acquire(self: &Arc<Self>, bytes: usize) -> BudgetLease {
        let mut used = self.used.lock();
        while *used >= self.threshold {
            self.below_threshold.wait(&mut used);
        }
        *used += bytes;
        self.lease(bytes)
    }

    /// Like [`acquire`](Self::acquire) but gives up after `timeout`.
    pub fn acquire_timeout(self: &Arc<Self>, bytes: usize, timeout: Duration) -> Option<BudgetLease> {
        let deadline = Instant::now() + timeout;
        let mut used = self.used.lock();
        while *used >= self.threshold {
            if self
                .below_threshold
                .wait_until(&mut used, deadline)
                .timed_out()
                && *used >= self.threshold
            {
                return None;
            }
        }
        *used += bytes;
        Some(self.lease(bytes))
    }

    pub fn try_acquire(self: &Arc<Self>, bytes: usize) -> Option<BudgetLease> {
        let mut used = self.used.lock();
        if *used >= self.threshold {
            return None;
        }
        *used += bytes;
        Some(self.lease(bytes))
    }

    fn lease(self: &Arc<Self>, bytes: usize) -> BudgetLease {
        BudgetLease {
            budget: self.clone(),
            bytes,
        }
    }

    fn release(&self, bytes: usize) {
        let mut used = self.used.lock();
        let was_blocking = *used >= self.threshold;
        *used = used.saturating_sub(bytes);
        if was_blocking && *used < self.threshold {
            self.below_threshold.notify_all();
        }
    }
}

impl fmt::Debug for MemoryBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBudget")
            .field("used", &self.used())
            .field("threshold", &self.threshold)
            .finish()
    }
}

/// Bytes held against a [`MemoryBudget`]; returned on drop.
pub struct BudgetLease {
    budget: Arc<MemoryBudget>,
    bytes: usize,
}

impl BudgetLease {
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn budget(&self) -> &Arc<MemoryBudget> {
        &self.budget
    }
}

impl Drop for BudgetLease {
    fn drop(&mut self) {
        self.budget.release(self.bytes);
    }
}

impl fmt::Debug for BudgetLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BudgetLease").field("bytes", &self.bytes).finish()
    }
}
