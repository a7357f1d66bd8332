//! Pool and reaper configuration
//!
//! Each component owns its options:
//! - `PoolOptions` - mode, sizing and timing for one `BufferPool`
//! - `ReaperOptions` - scan cadence for the shared `Reaper`
//!
//! Options are plain data with builder-style setters; `BufferPool::create`
//! calls [`PoolOptions::validate`] before anything is allocated.

use crate::error::{PoolError, Result};
use crate::reaper::Reaper;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Process-wide ceiling on bytes allocated by internally-managed pools (280 MiB)
pub const DEFAULT_BUDGET_BYTES: usize = 280 * 1024 * 1024;

/// Cap on live blocks for an internally-managed pool
pub const DEFAULT_MAX_BUFFERS: usize = 8;

/// Free-block count below which the allocator is asked for more
pub const DEFAULT_LOW_WATER_MARK: usize = 2;

/// How long `acquire` waits for a free block
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long the allocator waits for a release after a failed allocation
pub const DEFAULT_RECLAIM_BACKOFF: Duration = Duration::from_millis(40);

/// Interval between reaper scans
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(1);

/// Where a pool's buffers come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// The owner commits buffers one at a time
    ExternallyCommitted,
    /// A background allocator keeps the free list topped up
    InternallyManaged,
}

/// What `close` does while blocks are still checked out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClosePolicy {
    /// Wait until every outstanding block is released
    ///
    /// Never close with this policy from a thread that still holds guards on
    /// the pool; it would wait on itself.
    Block,
    /// Return immediately; the last release (or the reaper) finishes teardown
    #[default]
    Defer,
}

/// Configuration for one [`crate::BufferPool`]
#[derive(Debug, Clone)]
pub struct PoolOptions {
    mode: PoolMode,
    buffer_size: usize,
    max_buffers: usize,
    low_water_mark: usize,
    acquire_timeout: Duration,
    reclaim_backoff: Duration,
    close_policy: ClosePolicy,
    reaper: Option<Weak<Reaper>>,
}

impl PoolOptions {
    /// Options with defaults for everything but mode and buffer size
    ///
    /// # Arguments
    ///
    /// * `mode` - Who supplies the buffers
    /// * `buffer_size` - Size in bytes of buffers the allocator creates (internal mode)
    #[must_use]
    pub const fn new(mode: PoolMode, buffer_size: usize) -> Self {
        Self {
            mode,
            buffer_size,
            max_buffers: DEFAULT_MAX_BUFFERS,
            low_water_mark: DEFAULT_LOW_WATER_MARK,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            reclaim_backoff: DEFAULT_RECLAIM_BACKOFF,
            close_policy: ClosePolicy::Defer,
            reaper: None,
        }
    }

    /// Shorthand for an externally-committed pool
    #[must_use]
    pub const fn external(buffer_size: usize) -> Self {
        Self::new(PoolMode::ExternallyCommitted, buffer_size)
    }

    /// Shorthand for an internally-managed pool
    #[must_use]
    pub const fn internal(buffer_size: usize) -> Self {
        Self::new(PoolMode::InternallyManaged, buffer_size)
    }

    #[must_use]
    pub const fn with_max_buffers(mut self, max_buffers: usize) -> Self {
        self.max_buffers = max_buffers;
        self
    }

    #[must_use]
    pub const fn with_low_water_mark(mut self, low_water_mark: usize) -> Self {
        self.low_water_mark = low_water_mark;
        self
    }

    #[must_use]
    pub const fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_reclaim_backoff(mut self, backoff: Duration) -> Self {
        self.reclaim_backoff = backoff;
        self
    }

    #[must_use]
    pub const fn with_close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close_policy = policy;
        self
    }

    /// Hand pools closed under [`ClosePolicy::Defer`] to `reaper`
    ///
    /// The pool keeps only a weak reference; dropping the last `Arc` stops the reaper.
    #[must_use]
    pub fn with_reaper(mut self, reaper: &Arc<Reaper>) -> Self {
        self.reaper = Some(Arc::downgrade(reaper));
        self
    }

    #[must_use]
    pub const fn mode(&self) -> PoolMode {
        self.mode
    }

    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    #[must_use]
    pub const fn max_buffers(&self) -> usize {
        self.max_buffers
    }

    #[must_use]
    pub const fn low_water_mark(&self) -> usize {
        self.low_water_mark
    }

    #[must_use]
    pub const fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    #[must_use]
    pub const fn reclaim_backoff(&self) -> Duration {
        self.reclaim_backoff
    }

    #[must_use]
    pub const fn close_policy(&self) -> ClosePolicy {
        self.close_policy
    }

    /// The attached reaper, if it is still running
    #[must_use]
    pub fn reaper(&self) -> Option<Arc<Reaper>> {
        self.reaper.as_ref().and_then(Weak::upgrade)
    }

    /// Whether the pool runs its own allocator
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.mode == PoolMode::InternallyManaged
    }

    /// Check the options for values the pool cannot work with
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] if:
    /// - `buffer_size` is 0
    /// - `max_buffers` is 0 in internal mode
    /// - `low_water_mark` is 0 or above `max_buffers` in internal mode
    /// - `reclaim_backoff` is zero in internal mode
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(PoolError::InvalidConfig(
                "buffer size must be greater than 0".to_string(),
            ));
        }

        if !self.is_internal() {
            return Ok(());
        }

        if self.max_buffers == 0 {
            return Err(PoolError::InvalidConfig(
                "max buffers must be greater than 0".to_string(),
            ));
        }

        if self.low_water_mark == 0 || self.low_water_mark > self.max_buffers {
            return Err(PoolError::InvalidConfig(format!(
                "low-water mark must be between 1 and max buffers ({}), got: {}",
                self.max_buffers, self.low_water_mark
            )));
        }

        // A zero backoff turns a failing backend into a busy loop
        if self.reclaim_backoff.is_zero() {
            return Err(PoolError::InvalidConfig(
                "reclaim backoff must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for the [`Reaper`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaperOptions {
    /// Time between scans of pending pools
    pub scan_interval: Duration,
}

impl ReaperOptions {
    #[must_use]
    pub const fn new(scan_interval: Duration) -> Self {
        Self { scan_interval }
    }
}

impl Default for ReaperOptions {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_INTERVAL)
    }
}
