//! Per-pool statistics
//!
//! Lock-free atomic counters updated from consumer threads and the allocator
//! thread. Atomic operations use `Ordering::Relaxed` since the counters are
//! diagnostics only; nothing synchronizes on them.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Pool statistics (atomic for lock-free updates)
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    /// Successful acquire calls
    acquisitions: AtomicU64,
    /// Acquire calls that timed out
    acquire_timeouts: AtomicU64,
    /// Blocks inserted via commit (external or allocator)
    commits: AtomicU64,
    /// Buffers allocated by the allocator thread
    allocations: AtomicU64,
    /// Backend allocations (or maps) that failed
    allocation_failures: AtomicU64,
    /// Allocation cycles skipped because the budget was exhausted
    budget_deferrals: AtomicU64,
    /// Blocks torn down (backend release called)
    teardowns: AtomicU64,
    /// Peak simultaneous used blocks
    peak_used: AtomicUsize,
}

impl PoolStats {
    pub(crate) fn record_acquisition(&self, used_now: usize) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        // Update peak (compare-and-swap loop)
        let mut peak = self.peak_used.load(Ordering::Relaxed);
        while used_now > peak {
            match self.peak_used.compare_exchange_weak(
                peak,
                used_now,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }

    pub(crate) fn record_acquire_timeout(&self) {
        self.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_allocation(&self) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_allocation_failure(&self) {
        self.allocation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_budget_deferral(&self) {
        self.budget_deferrals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_teardowns(&self, count: usize) {
        self.teardowns.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            acquire_timeouts: self.acquire_timeouts.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            allocations: self.allocations.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            budget_deferrals: self.budget_deferrals.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            peak_used: self.peak_used.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a pool's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Successful acquisitions
    pub acquisitions: u64,
    /// Acquisitions that timed out
    pub acquire_timeouts: u64,
    /// Blocks committed into the pool
    pub commits: u64,
    /// Buffers allocated by the allocator thread
    pub allocations: u64,
    /// Failed backend allocations
    pub allocation_failures: u64,
    /// Allocation cycles skipped for lack of budget
    pub budget_deferrals: u64,
    /// Blocks torn down
    pub teardowns: u64,
    /// Peak simultaneous used blocks
    pub peak_used: usize,
}
