//! # vidmem-pool
//!
//! A bounded, reference-counted pool of shareable video buffers for decode and
//! display pipelines.
//!
//! ## Overview
//!
//! - [`BufferPool`] hands out fixed-size buffers as [`BlockGuard`]s, waiting up to
//!   a timeout (1000 ms by default) when none is free
//! - Externally-committed pools are filled by their owner with [`BufferPool::commit`]
//! - Internally-managed pools run a background allocator that keeps the free list
//!   at its low-water mark, within a process-wide [`MemoryBudget`] (280 MiB)
//! - Closing a pool with buffers still checked out defers teardown until the last
//!   buffer is released; an optional [`Reaper`] sweeps such pools periodically
//!
//! Buffers come from a [`backend::BufferBackend`] (see the `vidmem-backend` crate):
//! `memfd` on Linux, page-aligned heap memory elsewhere.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vidmem_pool::backend::HeapBackend;
//! use vidmem_pool::{BufferPool, MemoryBudget, PoolOptions};
//!
//! # fn main() -> vidmem_pool::Result<()> {
//! let budget = Arc::new(MemoryBudget::new(4 * 1024 * 1024));
//! let options = PoolOptions::internal(256 * 1024).with_max_buffers(4);
//! let pool = BufferPool::with_budget(options, HeapBackend::new(), budget)?;
//!
//! let frame = pool.acquire_timeout(Duration::from_secs(5))?;
//! assert_eq!(frame.size(), 256 * 1024);
//! # Ok(())
//! # }
//! ```

mod allocator;
pub mod block;
pub mod budget;
pub mod cli;
pub mod config;
pub mod error;
pub mod guard;
pub mod pool;
pub mod reaper;
pub mod stats;

pub use vidmem_backend as backend;

pub use block::{BlockId, BlockState};
pub use budget::MemoryBudget;
pub use config::{
    ClosePolicy, PoolMode, PoolOptions, ReaperOptions, DEFAULT_ACQUIRE_TIMEOUT,
    DEFAULT_BUDGET_BYTES, DEFAULT_LOW_WATER_MARK, DEFAULT_MAX_BUFFERS, DEFAULT_RECLAIM_BACKOFF,
    DEFAULT_SCAN_INTERVAL,
};
pub use error::{PoolError, Result};
pub use guard::BlockGuard;
pub use pool::{BufferPool, CloseOutcome, PoolCounts, PoolId};
pub use reaper::{Reaper, ScanReport};
pub use stats::PoolStatsSnapshot;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
