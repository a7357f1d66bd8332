//! Process-wide memory budget for internally-managed pools
//!
//! The budget is advisory back-pressure: the allocator reserves a buffer's size
//! before asking the backend for it and skips the cycle when the reservation
//! would exceed the ceiling. Reservations are compare-and-swap, so concurrent
//! allocators never push the total past the ceiling, not even transiently.

use crate::config::DEFAULT_BUDGET_BYTES;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::warn;

static GLOBAL_BUDGET: OnceLock<Arc<MemoryBudget>> = OnceLock::new();

/// Byte ceiling shared by every pool holding the same `Arc<MemoryBudget>`
#[derive(Debug)]
pub struct MemoryBudget {
    ceiling: usize,
    allocated: AtomicUsize,
}

impl MemoryBudget {
    /// Create a private budget with the given ceiling
    #[must_use]
    pub const fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            allocated: AtomicUsize::new(0),
        }
    }

    /// The process-wide budget (280 MiB) used by `BufferPool::create`
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL_BUDGET.get_or_init(|| Arc::new(Self::new(DEFAULT_BUDGET_BYTES))))
    }

    /// Reserve `bytes` if the ceiling allows it
    ///
    /// Reaching the ceiling exactly is allowed.
    #[must_use]
    pub fn try_reserve(&self, bytes: usize) -> bool {
        self.allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current
                    .checked_add(bytes)
                    .filter(|&total| total <= self.ceiling)
            })
            .is_ok()
    }

    /// Return a reservation made with [`Self::try_reserve`]
    pub fn release(&self, bytes: usize) {
        let result = self
            .allocated
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(bytes))
            });
        if let Ok(previous) = result {
            if previous < bytes {
                warn!(
                    "Budget release of {} bytes exceeds {} reserved bytes",
                    bytes, previous
                );
            }
        }
    }

    /// Bytes currently reserved
    #[must_use]
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Bytes still available before the ceiling
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.ceiling.saturating_sub(self.allocated())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use std::thread;

    #[test]
    fn test_reserve_up_to_ceiling() {
        let budget = MemoryBudget::new(3000);
        assert!(budget.try_reserve(1000));
        assert!(budget.try_reserve(2000));
        assert_eq!(budget.remaining(), 0);
        assert!(!budget.try_reserve(1));

        budget.release(1000);
        assert_eq!(budget.allocated(), 2000);
        assert!(budget.try_reserve(1000));
    }

    #[test]
    fn test_release_saturates() {
        let budget = MemoryBudget::new(100);
        assert!(budget.try_reserve(10));
        budget.release(50);
        assert_eq!(budget.allocated(), 0);
    }

    #[test]
    fn test_concurrent_reservations_never_overshoot() {
        let budget = Arc::new(MemoryBudget::new(10 * 4096));
        let granted: usize = thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let budget = &budget;
                    scope.spawn(move || (0..10).filter(|_| budget.try_reserve(4096)).count())
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });
        assert_eq!(granted, 10);
        assert_eq!(budget.allocated(), budget.ceiling());
    }

    #[test]
    fn test_global_is_shared() {
        let a = MemoryBudget::global();
        let b = MemoryBudget::global();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.ceiling(), DEFAULT_BUDGET_BYTES);
    }
}
