//! Deferred destruction of pools closed with buffers still checked out
//!
//! The last release on a closing pool finalizes it by itself; the reaper is
//! the backstop that periodically sweeps pending pools, finalizes any that
//! have drained, and warns about consumers that hold buffers for too long.
//! Finalization is idempotent, so whichever path gets there first wins and
//! the other is a no-op.

use crate::config::ReaperOptions;
use crate::error::{PoolError, Result};
use crate::pool::{PoolId, PoolShared};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Outcome of one sweep over the pending pools
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Pools finalized and removed during this scan
    pub finalized: usize,
    /// Pools still waiting on outstanding blocks
    pub pending: usize,
}

struct ReaperShared {
    pending: DashMap<PoolId, Arc<PoolShared>>,
    options: ReaperOptions,
    stop: Mutex<bool>,
    wake: Condvar,
}

impl ReaperShared {
    fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        self.pending.retain(|id, pool| {
            if pool.try_finalize() {
                debug!("reaper finalized {}", id);
                report.finalized += 1;
                false
            } else {
                warn!(
                    "{} still has {} blocks checked out after close",
                    id,
                    pool.outstanding()
                );
                report.pending += 1;
                true
            }
        });
        report
    }

    fn run(&self) {
        let mut stop = self.stop.lock();
        while !*stop {
            let _ = self.wake.wait_for(&mut stop, self.options.scan_interval);
            if *stop {
                break;
            }
            drop(stop);
            if !self.pending.is_empty() {
                self.scan();
            }
            stop = self.stop.lock();
        }
    }
}

/// Background finalizer shared by any number of pools
pub struct Reaper {
    shared: Arc<ReaperShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Reaper {
    /// Start the scan thread
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::ThreadSpawn`] if the thread cannot be started.
    pub fn start(options: ReaperOptions) -> Result<Arc<Self>> {
        let shared = Arc::new(ReaperShared {
            pending: DashMap::new(),
            options,
            stop: Mutex::new(false),
            wake: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("vidmem-reaper".to_string())
            .spawn(move || worker.run())
            .map_err(|source| PoolError::ThreadSpawn {
                name: "reaper",
                source,
            })?;

        info!(
            "reaper started: scan interval {:?}",
            options.scan_interval
        );
        Ok(Arc::new(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }))
    }

    /// Track a closing pool until it finalizes
    pub(crate) fn register(&self, pool: Arc<PoolShared>) {
        if pool.is_finalized() {
            return;
        }
        debug!("reaper tracking {}", pool.id());
        self.shared.pending.insert(pool.id(), pool);
    }

    /// Sweep pending pools now instead of waiting for the next tick
    pub fn scan_once(&self) -> ScanReport {
        self.shared.scan()
    }

    /// Pools still awaiting finalization
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending.len()
    }

    /// Stop the scan thread and wait for it
    ///
    /// Pools still pending keep finalizing through their own last release.
    pub fn shutdown(&self) {
        *self.shared.stop.lock() = true;
        self.shared.wake.notify_all();

        let thread = self.thread.lock().take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                error!("reaper thread panicked");
            }
            debug!("reaper stopped with {} pools pending", self.pending());
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Reaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaper")
            .field("scan_interval", &self.shared.options.scan_interval)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
