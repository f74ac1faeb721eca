//! Monotonic stop flag shared between the pool and its workers

use std::sync::atomic::{AtomicBool, Ordering};

/// A flag that goes from unset to set exactly once and never back.
///
/// Any number of threads may read it. [`trigger`](StopFlag::trigger) uses a
/// compare-exchange so that among concurrent callers exactly one observes
/// the transition.
#[derive(Debug, Default)]
pub struct StopFlag {
    set: AtomicBool,
}

impl StopFlag {
    /// Create an unset flag
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the call that performed the transition.
    pub fn trigger(&self) -> bool {
        self.set
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Check whether the flag has been set
    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }
}
