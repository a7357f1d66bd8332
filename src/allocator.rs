//! Background allocator for internally-managed pools
//!
//! Each internally-managed pool owns one named thread that keeps its free
//! list topped up, so `acquire` never waits on backend allocation latency.
//! The thread sleeps on a command channel; consumers send `NeedMore` when the
//! free count drops below the low-water mark and `close` sends `Stop`.
//!
//! One fill cycle:
//! 1. Tear down free blocks left over from an older size generation
//! 2. Reserve the buffer size from the memory budget; skip the cycle if the
//!    budget is exhausted (back-pressure, not an error)
//! 3. Allocate from the backend and commit the buffer to the pool
//! 4. On backend failure, wait up to `reclaim_backoff` for a release and retry

use crate::error::{PoolError, Result};
use crate::pool::PoolShared;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, warn};

/// Commands understood by the allocator thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AllocatorSignal {
    /// The free list dropped below the low-water mark
    NeedMore,
    /// The pool is closing
    Stop,
}

/// Whether the allocator should keep running after a fill cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Owner side of a running allocator thread
#[derive(Debug)]
pub(crate) struct AllocatorHandle {
    tx: Sender<AllocatorSignal>,
    thread: JoinHandle<()>,
}

impl AllocatorHandle {
    /// Spawn the allocator thread for `pool`
    pub(crate) fn spawn(pool: Arc<PoolShared>) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let name = format!("vidmem-alloc-{}", pool.id());
        let task = AllocatorTask {
            pool,
            rx,
            starved: false,
        };
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || task.run())
            .map_err(|source| PoolError::ThreadSpawn {
                name: "allocator",
                source,
            })?;
        Ok(Self { tx, thread })
    }

    /// Send a command; a thread that already exited is ignored
    pub(crate) fn send(&self, signal: AllocatorSignal) {
        let _ = self.tx.send(signal);
    }

    /// Stop the thread and wait for it to exit
    pub(crate) fn stop(self) {
        self.send(AllocatorSignal::Stop);
        let name = self.thread.thread().name().unwrap_or("allocator").to_string();
        if self.thread.join().is_err() {
            error!("{} panicked", name);
        }
    }
}

struct AllocatorTask {
    pool: Arc<PoolShared>,
    rx: Receiver<AllocatorSignal>,
    /// A budget starvation episode is in progress (warned once)
    starved: bool,
}

impl AllocatorTask {
    fn run(mut self) {
        debug!("{} allocator started", self.pool.id());
        while let Ok(AllocatorSignal::NeedMore) = self.rx.recv() {
            if self.coalesce() == Flow::Stop || self.fill() == Flow::Stop {
                break;
            }
        }
        debug!("{} allocator stopped", self.pool.id());
    }

    /// Swallow queued `NeedMore` signals; one fill cycle serves them all
    fn coalesce(&self) -> Flow {
        loop {
            match self.rx.try_recv() {
                Ok(AllocatorSignal::NeedMore) => {}
                Ok(AllocatorSignal::Stop) | Err(TryRecvError::Disconnected) => return Flow::Stop,
                Err(TryRecvError::Empty) => return Flow::Continue,
            }
        }
    }

    /// Allocate until the pool is back at its low-water mark or growth is blocked
    fn fill(&mut self) -> Flow {
        let pool = Arc::clone(&self.pool);
        loop {
            pool.drain_stale();
            let Some(size) = pool.next_allocation() else {
                return Flow::Continue;
            };

            if !pool.budget().try_reserve(size) {
                pool.stats().record_budget_deferral();
                self.warn_starved(size);
                return Flow::Continue;
            }
            self.starved = false;

            let handle = match pool.backend().allocate(size) {
                Ok(handle) => handle,
                Err(err) => {
                    pool.budget().release(size);
                    if self.back_off(size, &PoolError::from(err)) == Flow::Stop {
                        return Flow::Stop;
                    }
                    continue;
                }
            };
            pool.stats().record_allocation();

            // commit_handle returns the reservation itself when it fails
            match pool.commit_handle(handle, size) {
                Ok(id) => {
                    debug!("{} allocated block {} size={}", pool.id(), id, size);
                    pool.notify_reclaimed();
                }
                Err(PoolError::Closed) => return Flow::Stop,
                Err(err) => {
                    if self.back_off(size, &err) == Flow::Stop {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    /// Wait for a release (or the backoff interval) after a failed allocation
    fn back_off(&self, size: usize, err: &PoolError) -> Flow {
        self.pool.stats().record_allocation_failure();
        debug!(
            "{} allocation of {} bytes failed, backing off: {}",
            self.pool.id(),
            size,
            err
        );
        self.pool
            .wait_for_reclaim(self.pool.options().reclaim_backoff());
        self.coalesce()
    }

    fn warn_starved(&mut self, size: usize) {
        if self.starved {
            return;
        }
        self.starved = true;
        let budget = self.pool.budget();
        warn!(
            "{} growth paused: memory budget exhausted ({} of {} bytes reserved, next buffer {} bytes)",
            self.pool.id(),
            budget.allocated(),
            budget.ceiling(),
            size
        );
    }
}
