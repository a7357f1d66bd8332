//! Reference-counted pool of shareable video buffers
//!
//! A `BufferPool` brokers a bounded set of backend buffers to consumers
//! (decoder output, display, encoders). Blocks move between three states:
//!
//! - `Free` - committed and waiting for a consumer
//! - `Used` - acquired, refcount > 0
//! - `Aborting` - still referenced, but torn down on final release because the
//!   pool was reset or is closing
//!
//! # Architecture
//!
//! - One `parking_lot::Mutex` guards the block arena and every state transition
//! - The `available` condvar plus the free count under that mutex form the
//!   counting semaphore `acquire` waits on
//! - Refcount zero crossings happen under the mutex, so a block is removed from
//!   the arena exactly once; backend teardown runs after the lock is dropped
//! - Internally-managed pools own an allocator thread (see `allocator`) that is
//!   woken over a channel whenever the free count drops below the low-water mark
//! - `BlockGuard` holds an `Arc` to the shared state, so a closed pool stays
//!   alive until its last outstanding block is released
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vidmem_pool::backend::{BufferBackend, HeapBackend};
//! use vidmem_pool::{BufferPool, PoolOptions};
//!
//! # fn main() -> vidmem_pool::Result<()> {
//! let backend = Arc::new(HeapBackend::new());
//! let pool = BufferPool::create(PoolOptions::external(4096), Arc::clone(&backend))?;
//!
//! let producer = HeapBackend::new();
//! let frame = producer.allocate(4096)?;
//! pool.commit(frame.fd(), frame.size())?;
//!
//! let block = pool.acquire()?;
//! assert_eq!(block.size(), 4096);
//! drop(block);
//! assert_eq!(pool.available_hint(), 1);
//!
//! pool.close()?;
//! producer.release(frame);
//! # Ok(())
//! # }
//! ```

use crate::allocator::{AllocatorHandle, AllocatorSignal};
use crate::block::{BlockArena, BlockId, BlockState, MemoryBlock};
use crate::budget::MemoryBudget;
use crate::config::{ClosePolicy, PoolOptions};
use crate::error::{PoolError, Result};
use crate::guard::BlockGuard;
use crate::stats::{PoolStats, PoolStatsSnapshot};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use vidmem_backend::{BufferBackend, BufferHandle};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique pool identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(u64);

impl PoolId {
    fn next() -> Self {
        Self(NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool-{}", self.0)
    }
}

/// Block counts per state, observed under the pool lock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolCounts {
    pub free: usize,
    pub used: usize,
    pub aborting: usize,
}

impl PoolCounts {
    /// Blocks not yet destroyed
    #[must_use]
    pub const fn total(&self) -> usize {
        self.free + self.used + self.aborting
    }
}

/// Result of [`BufferPool::close`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Every buffer has been released to the backend
    Closed,
    /// Blocks are still checked out; teardown finishes when they are released
    Deferred {
        /// Blocks still referenced by consumers
        outstanding: usize,
    },
}

/// Mutable pool state, only touched under `PoolShared::state`
#[derive(Debug)]
struct PoolState {
    blocks: BlockArena,
    /// Size requested by the owner for new allocations
    requested_size: usize,
    /// Size of the current generation; `None` after a reset until the allocator picks one
    target_size: Option<usize>,
    closing: bool,
    /// Set by whoever takes ownership of the final teardown
    finalizing: bool,
    /// Set once the final teardown has released every buffer
    finalized: bool,
    /// The allocator is backing off and wants to hear about releases
    waiting_reclaim: bool,
}

impl PoolState {
    fn is_stale(&self, internal: bool, size: usize) -> bool {
        internal && self.target_size.is_some_and(|target| target != size)
    }

    /// Claim the final teardown, taking every block still in the arena
    fn begin_finalize(&mut self) -> Vec<MemoryBlock> {
        self.finalizing = true;
        self.blocks.drain_where(|_| true)
    }
}

/// State shared by the owner handle, guards, the allocator thread and the reaper
pub(crate) struct PoolShared {
    id: PoolId,
    options: PoolOptions,
    backend: Arc<dyn BufferBackend>,
    budget: Arc<MemoryBudget>,
    state: Mutex<PoolState>,
    /// Signaled when a block enters the free list or the pool starts closing
    available: Condvar,
    /// Signaled when memory is handed back while the allocator backs off
    reclaim: Condvar,
    /// Signaled when final teardown completes
    drained: Condvar,
    free_hint: AtomicUsize,
    used_count: AtomicUsize,
    abort_count: AtomicUsize,
    stats: PoolStats,
    allocator: Mutex<Option<AllocatorHandle>>,
}

impl PoolShared {
    fn new(options: PoolOptions, backend: Arc<dyn BufferBackend>, budget: Arc<MemoryBudget>) -> Self {
        let requested_size = options.buffer_size();
        let target_size = options.is_internal().then_some(requested_size);
        Self {
            id: PoolId::next(),
            options,
            backend,
            budget,
            state: Mutex::new(PoolState {
                blocks: BlockArena::default(),
                requested_size,
                target_size,
                closing: false,
                finalizing: false,
                finalized: false,
                waiting_reclaim: false,
            }),
            available: Condvar::new(),
            reclaim: Condvar::new(),
            drained: Condvar::new(),
            free_hint: AtomicUsize::new(0),
            used_count: AtomicUsize::new(0),
            abort_count: AtomicUsize::new(0),
            stats: PoolStats::default(),
            allocator: Mutex::new(None),
        }
    }

    pub(crate) const fn id(&self) -> PoolId {
        self.id
    }

    pub(crate) const fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub(crate) fn backend(&self) -> &dyn BufferBackend {
        self.backend.as_ref()
    }

    pub(crate) fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub(crate) const fn stats(&self) -> &PoolStats {
        &self.stats
    }

    /// Blocks still referenced after a reset or close
    pub(crate) fn outstanding(&self) -> usize {
        self.abort_count.load(Ordering::Acquire)
    }

    fn publish_free(&self, state: &PoolState) {
        self.free_hint
            .store(state.blocks.count(BlockState::Free), Ordering::Release);
    }

    /// Ask the allocator thread for more buffers
    pub(crate) fn signal_allocator(&self) {
        if let Some(allocator) = self.allocator.lock().as_ref() {
            allocator.send(AllocatorSignal::NeedMore);
        }
    }

    fn attach_allocator(&self, allocator: AllocatorHandle) {
        *self.allocator.lock() = Some(allocator);
    }

    fn stop_allocator(&self) {
        let allocator = self.allocator.lock().take();
        if let Some(allocator) = allocator {
            allocator.stop();
        }
    }

    /// Import a buffer owned elsewhere and add it to the free list
    pub(crate) fn commit(&self, fd: RawFd, size: usize) -> Result<BlockId> {
        let handle = self.backend.import(fd, size)?;
        self.commit_handle(handle, 0)
    }

    /// Map `handle` and add it to the free list
    ///
    /// On failure the handle is released and `budget_charge` is returned to the budget.
    pub(crate) fn commit_handle(&self, mut handle: BufferHandle, budget_charge: usize) -> Result<BlockId> {
        if let Err(err) = self.backend.map(&mut handle) {
            self.backend.release(handle);
            if budget_charge > 0 {
                self.budget.release(budget_charge);
            }
            return Err(err.into());
        }

        let descriptor = self.backend.descriptor(&handle);
        let size = handle.size();
        let block = MemoryBlock::new(handle, descriptor, budget_charge);

        let mut state = self.state.lock();
        if state.closing {
            drop(state);
            self.destroy(vec![block]);
            return Err(PoolError::Closed);
        }
        let id = state.blocks.insert(block);
        self.publish_free(&state);
        drop(state);

        self.stats.record_commit();
        self.available.notify_one();
        debug!("{} committed block {} fd={} size={}", self.id, id, descriptor, size);
        Ok(id)
    }

    /// Wait up to `timeout` for a free block of the current generation
    ///
    /// A timeout too large to express as a deadline waits without one.
    /// Internally-managed pools re-signal the allocator every `reclaim_backoff`
    /// while waiting, so a cycle skipped for lack of budget is retried once
    /// budget frees up elsewhere.
    pub(crate) fn acquire(self: &Arc<Self>, timeout: Duration) -> Result<BlockGuard> {
        let internal = self.options.is_internal();
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            if state.closing {
                return Err(PoolError::Closed);
            }

            let candidate = state
                .blocks
                .oldest_free(|block| !state.is_stale(internal, block.size()));
            if let Some(id) = candidate {
                let Some(block) = state.blocks.get_mut(id) else {
                    return Err(PoolError::BlockNotFound(id));
                };
                block.refcount = 1;
                block.state = BlockState::Used;
                let (descriptor, size, addr) = (block.descriptor, block.size(), block.addr());

                let used = self.used_count.fetch_add(1, Ordering::AcqRel) + 1;
                self.publish_free(&state);
                let low = internal
                    && state.blocks.count(BlockState::Free) < self.options.low_water_mark();
                drop(state);

                self.stats.record_acquisition(used);
                if low {
                    self.signal_allocator();
                }
                return Ok(BlockGuard::new(Arc::clone(self), id, descriptor, size, addr));
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                drop(state);
                self.stats.record_acquire_timeout();
                debug!("{} acquire timed out after {:?}", self.id, timeout);
                return Err(PoolError::AcquireTimeout { waited: timeout });
            }

            self.signal_allocator();
            let resignal = internal
                .then(|| now.checked_add(self.options.reclaim_backoff()))
                .flatten();
            let wake = match (deadline, resignal) {
                (Some(deadline), Some(resignal)) => Some(deadline.min(resignal)),
                (deadline, resignal) => deadline.or(resignal),
            };
            match wake {
                Some(wake) => {
                    let _ = self.available.wait_until(&mut state, wake);
                }
                None => self.available.wait(&mut state),
            }
        }
    }

    /// Add a reference to a checked-out block
    pub(crate) fn retain(&self, id: BlockId) -> Result<()> {
        let mut state = self.state.lock();
        let block = state
            .blocks
            .get_mut(id)
            .filter(|block| block.state != BlockState::Free)
            .ok_or(PoolError::BlockNotFound(id))?;
        block.refcount += 1;
        Ok(())
    }

    /// Drop a reference; the zero crossing recycles or tears the block down
    pub(crate) fn release(&self, id: BlockId) -> Result<()> {
        let internal = self.options.is_internal();
        let mut state = self.state.lock();
        let block = state
            .blocks
            .get_mut(id)
            .filter(|block| block.state != BlockState::Free)
            .ok_or(PoolError::BlockNotFound(id))?;

        block.refcount -= 1;
        if block.refcount > 0 {
            return Ok(());
        }
        let (block_state, size) = (block.state, block.size());

        match block_state {
            BlockState::Used => {
                self.used_count.fetch_sub(1, Ordering::AcqRel);
                if state.is_stale(internal, size) {
                    let stale = state.blocks.remove(id);
                    drop(state);
                    debug!("{} dropping stale block {} size={}", self.id, id, size);
                    self.destroy(stale.into_iter().collect());
                    self.signal_allocator();
                    return Ok(());
                }

                state.blocks.mark_free(id);
                self.publish_free(&state);
                self.available.notify_one();
                if state.waiting_reclaim {
                    self.reclaim.notify_all();
                }
                Ok(())
            }
            BlockState::Aborting => {
                let mut doomed: Vec<MemoryBlock> = state.blocks.remove(id).into_iter().collect();
                let remaining = self.abort_count.fetch_sub(1, Ordering::AcqRel) - 1;
                let finalize = remaining == 0 && state.closing && !state.finalizing;
                if finalize {
                    doomed.extend(state.begin_finalize());
                }
                drop(state);

                self.destroy(doomed);
                if finalize {
                    self.complete_finalize();
                }
                Ok(())
            }
            BlockState::Free => Err(PoolError::BlockNotFound(id)),
        }
    }

    pub(crate) fn available_hint(&self) -> usize {
        self.free_hint.load(Ordering::Acquire)
    }

    /// Discard the current generation without waiting for consumers
    pub(crate) fn reset(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.closing {
            return Err(PoolError::Closed);
        }

        let free = state.blocks.drain_where(|block| block.state == BlockState::Free);
        let aborted = self.abort_used(&mut state);
        state.target_size = None;
        self.publish_free(&state);
        drop(state);

        info!(
            "{} reset: {} free blocks torn down, {} in use marked aborting",
            self.id,
            free.len(),
            aborted
        );
        self.destroy(free);
        self.signal_allocator();
        Ok(())
    }

    /// Relabel every used block as aborting; returns how many moved
    fn abort_used(&self, state: &mut PoolState) -> usize {
        let used = state
            .blocks
            .ids_where(|block| block.state == BlockState::Used);
        for &id in &used {
            if let Some(block) = state.blocks.get_mut(id) {
                block.state = BlockState::Aborting;
            }
        }
        self.used_count.fetch_sub(used.len(), Ordering::AcqRel);
        self.abort_count.fetch_add(used.len(), Ordering::AcqRel);
        used.len()
    }

    /// Start a new buffer-size generation
    pub(crate) fn resize(&self, size: usize) -> Result<()> {
        if !self.options.is_internal() {
            return Err(PoolError::InvalidConfig(
                "resize requires an internally-managed pool".to_string(),
            ));
        }
        if size == 0 {
            return Err(PoolError::InvalidConfig(
                "buffer size must be greater than 0".to_string(),
            ));
        }

        let mut state = self.state.lock();
        if state.closing {
            return Err(PoolError::Closed);
        }
        state.requested_size = size;
        state.target_size = Some(size);
        drop(state);

        info!("{} resized to {} byte buffers", self.id, size);
        self.signal_allocator();
        Ok(())
    }

    pub(crate) fn close(self: &Arc<Self>) -> Result<CloseOutcome> {
        self.stop_allocator();

        let mut state = self.state.lock();
        if state.closing {
            let outcome = if state.finalized {
                CloseOutcome::Closed
            } else {
                CloseOutcome::Deferred {
                    outstanding: self.outstanding(),
                }
            };
            return Ok(outcome);
        }

        state.closing = true;
        let free = state.blocks.drain_where(|block| block.state == BlockState::Free);
        self.abort_used(&mut state);
        self.publish_free(&state);
        self.available.notify_all();
        self.reclaim.notify_all();

        let outstanding = self.outstanding();
        let mut doomed = free;
        if outstanding == 0 {
            doomed.extend(state.begin_finalize());
        }
        drop(state);

        self.destroy(doomed);
        if outstanding == 0 {
            self.complete_finalize();
            return Ok(CloseOutcome::Closed);
        }

        match self.options.close_policy() {
            ClosePolicy::Block => {
                info!(
                    "{} closing: waiting for {} outstanding blocks",
                    self.id, outstanding
                );
                let mut state = self.state.lock();
                while !state.finalized {
                    self.drained.wait(&mut state);
                }
                Ok(CloseOutcome::Closed)
            }
            ClosePolicy::Defer => {
                warn!(
                    "{} closed with {} blocks still in use; teardown deferred",
                    self.id, outstanding
                );
                if let Some(reaper) = self.options.reaper() {
                    reaper.register(Arc::clone(self));
                }
                Ok(CloseOutcome::Deferred { outstanding })
            }
        }
    }

    /// Finish teardown of a closing pool whose blocks have all been released
    ///
    /// Returns `true` once the pool is finalized (or another thread is finishing it).
    pub(crate) fn try_finalize(&self) -> bool {
        let mut state = self.state.lock();
        if state.finalizing {
            return true;
        }
        if !state.closing || self.outstanding() > 0 {
            return false;
        }
        let doomed = state.begin_finalize();
        drop(state);

        self.destroy(doomed);
        self.complete_finalize();
        true
    }

    fn complete_finalize(&self) {
        let mut state = self.state.lock();
        state.finalized = true;
        drop(state);
        self.drained.notify_all();
        info!("{} finalized", self.id);
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }

    /// Tear down free blocks left over from an older size generation
    pub(crate) fn drain_stale(&self) -> usize {
        let internal = self.options.is_internal();
        let mut state = self.state.lock();
        let requested = state.requested_size;
        let target = *state.target_size.get_or_insert(requested);
        let stale = state.blocks.drain_where(|block| {
            block.state == BlockState::Free && internal && block.size() != target
        });
        self.publish_free(&state);
        drop(state);

        let count = stale.len();
        if count > 0 {
            debug!("{} drained {} stale free blocks", self.id, count);
        }
        self.destroy(stale);
        count
    }

    /// Size of the next buffer the allocator should create, if any
    pub(crate) fn next_allocation(&self) -> Option<usize> {
        let state = self.state.lock();
        if state.closing {
            return None;
        }
        let target = state.target_size.unwrap_or(state.requested_size);
        let fresh = |wanted: BlockState| {
            state
                .blocks
                .ids_where(|block| block.state == wanted && block.size() == target)
                .len()
        };
        let free = fresh(BlockState::Free);
        let live = free + fresh(BlockState::Used);

        (free < self.options.low_water_mark() && live < self.options.max_buffers())
            .then_some(target)
    }

    /// Back off until a block is released or `timeout` passes
    pub(crate) fn wait_for_reclaim(&self, timeout: Duration) {
        let mut state = self.state.lock();
        if state.closing {
            return;
        }
        state.waiting_reclaim = true;
        let _ = self.reclaim.wait_for(&mut state, timeout);
        state.waiting_reclaim = false;
    }

    /// Wake an allocator backing off after a failed allocation
    pub(crate) fn notify_reclaimed(&self) {
        self.reclaim.notify_all();
    }

    pub(crate) fn lookup_descriptor(&self, descriptor: RawFd) -> Option<BlockId> {
        self.state.lock().blocks.find_descriptor(descriptor)
    }

    pub(crate) fn counts(&self) -> PoolCounts {
        let state = self.state.lock();
        PoolCounts {
            free: state.blocks.count(BlockState::Free),
            used: state.blocks.count(BlockState::Used),
            aborting: state.blocks.count(BlockState::Aborting),
        }
    }

    /// Unmap and release blocks already removed from the arena
    fn destroy(&self, blocks: Vec<MemoryBlock>) {
        if blocks.is_empty() {
            return;
        }
        let count = blocks.len();
        for mut block in blocks {
            if let Err(err) = self.backend.unmap(&mut block.handle) {
                warn!("{} failed to unmap fd={}: {}", self.id, block.descriptor, err);
            }
            if block.budget_charge > 0 {
                self.budget.release(block.budget_charge);
            }
            debug!(
                "{} tore down fd={} size={}",
                self.id,
                block.descriptor,
                block.size()
            );
            self.backend.release(block.handle);
        }
        self.stats.record_teardowns(count);
        self.reclaim.notify_all();
    }
}

impl fmt::Debug for PoolShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolShared")
            .field("id", &self.id)
            .field("mode", &self.options.mode())
            .field("free", &self.available_hint())
            .field("used", &self.used_count.load(Ordering::Relaxed))
            .field("aborting", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let blocks = &self.state.get_mut().blocks;
        if !blocks.is_empty() {
            let remaining = blocks.len();
            // Ids detached from their guards were never released and their
            // mappings may still be in use, so the pool does not unmap them.
            error!(
                "{} dropped with {} blocks never released; skipping their teardown",
                self.id, remaining
            );
        }
    }
}

/// Owner handle of a buffer pool
///
/// Dropping the handle closes the pool with its configured [`ClosePolicy`].
#[derive(Debug)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

impl BufferPool {
    /// Create a pool charged against the process-wide budget
    ///
    /// Internally-managed pools start their allocator thread and prefill up to
    /// the low-water mark.
    ///
    /// # Errors
    ///
    /// Returns an error if the options fail validation or the allocator thread
    /// cannot be spawned.
    pub fn create<B>(options: PoolOptions, backend: B) -> Result<Self>
    where
        B: BufferBackend + 'static,
    {
        Self::with_budget(options, backend, MemoryBudget::global())
    }

    /// Create a pool charged against `budget`
    ///
    /// # Errors
    ///
    /// Returns an error if the options fail validation or the allocator thread
    /// cannot be spawned.
    pub fn with_budget<B>(options: PoolOptions, backend: B, budget: Arc<MemoryBudget>) -> Result<Self>
    where
        B: BufferBackend + 'static,
    {
        options.validate()?;
        let internal = options.is_internal();
        let shared = Arc::new(PoolShared::new(options, Arc::new(backend), budget));

        if internal {
            let allocator = AllocatorHandle::spawn(Arc::clone(&shared))?;
            allocator.send(AllocatorSignal::NeedMore);
            shared.attach_allocator(allocator);
        }

        info!(
            "{} created: mode={:?} buffer_size={}",
            shared.id,
            shared.options.mode(),
            shared.options.buffer_size()
        );
        Ok(Self { shared })
    }

    #[must_use]
    pub fn id(&self) -> PoolId {
        self.shared.id()
    }

    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        self.shared.options()
    }

    /// Wrap a buffer owned elsewhere and add it to the free list
    ///
    /// The backend imports its own reference; the caller keeps `fd`.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Backend`] if import or mapping fails (nothing is
    /// added), or [`PoolError::Closed`] if the pool is closing.
    pub fn commit(&self, fd: RawFd, size: usize) -> Result<BlockId> {
        self.shared.commit(fd, size)
    }

    /// Add a handle already obtained from this pool's backend
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Backend`] if mapping fails or [`PoolError::Closed`]
    /// if the pool is closing. The handle is released in both cases.
    pub fn commit_handle(&self, handle: BufferHandle) -> Result<BlockId> {
        self.shared.commit_handle(handle, 0)
    }

    /// Acquire a free block, waiting up to the configured timeout
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::AcquireTimeout`] if nothing became free in time
    /// (retryable), or [`PoolError::Closed`] if the pool is closing.
    pub fn acquire(&self) -> Result<BlockGuard> {
        self.shared.acquire(self.shared.options().acquire_timeout())
    }

    /// Acquire a free block, waiting up to `timeout`
    ///
    /// # Errors
    ///
    /// Same as [`Self::acquire`].
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<BlockGuard> {
        self.shared.acquire(timeout)
    }

    /// Add a reference to a block detached with [`BlockGuard::into_id`]
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::BlockNotFound`] if the block is not checked out.
    pub fn retain(&self, id: BlockId) -> Result<()> {
        self.shared.retain(id)
    }

    /// Drop a reference to a block detached with [`BlockGuard::into_id`]
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::BlockNotFound`] if the block is not checked out.
    pub fn release(&self, id: BlockId) -> Result<()> {
        self.shared.release(id)
    }

    /// Best-effort count of free blocks
    #[must_use]
    pub fn available_hint(&self) -> usize {
        self.shared.available_hint()
    }

    /// Discard the current generation of buffers
    ///
    /// Free blocks are torn down now; used blocks are torn down on their final
    /// release. Internally-managed pools pick a fresh size on the next cycle.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Closed`] if the pool is closing.
    pub fn reset(&self) -> Result<()> {
        self.shared.reset()
    }

    /// Switch an internally-managed pool to `size` byte buffers
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConfig`] for external pools or a zero size,
    /// and [`PoolError::Closed`] if the pool is closing.
    pub fn resize(&self, size: usize) -> Result<()> {
        self.shared.resize(size)
    }

    /// Close the pool using its configured [`ClosePolicy`]
    ///
    /// Idempotent; later calls report the current outcome.
    ///
    /// # Errors
    ///
    /// Currently infallible; the `Result` leaves room for policies that can fail.
    pub fn close(&self) -> Result<CloseOutcome> {
        self.shared.close()
    }

    /// Block owning `descriptor`, if any
    #[must_use]
    pub fn lookup_descriptor(&self, descriptor: RawFd) -> Option<BlockId> {
        self.shared.lookup_descriptor(descriptor)
    }

    #[must_use]
    pub fn counts(&self) -> PoolCounts {
        self.shared.counts()
    }

    #[must_use]
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.shared.stats().snapshot()
    }

    #[must_use]
    pub fn budget(&self) -> &MemoryBudget {
        self.shared.budget()
    }

    /// Whether final teardown has completed
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.shared.is_finalized()
    }
}

impl Drop for BufferPool {
    fn drop(&mut self) {
        if let Err(err) = self.shared.close() {
            error!("{} failed to close on drop: {}", self.shared.id(), err);
        }
    }
}
