use crossbeam::utils::CachePadded;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cheaply clonable liveness flag shared between the engine handle and the
/// dispatch thread.
#[derive(Clone)]
#[repr(transparent)]
pub struct HealthFlag(Arc<CachePadded<AtomicBool>>);

impl HealthFlag {
    #[inline]
    pub fn new(initial: bool) -> Self {
        Self(Arc::new(CachePadded::new(AtomicBool::new(initial))))
    }

    /// Current value (acquire load, pairs with [`HealthFlag::down`]).
    #[inline(always)]
    pub fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn up(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub fn down(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl fmt::Debug for HealthFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("HealthFlag").field(&self.get()).finish()
    }
}
