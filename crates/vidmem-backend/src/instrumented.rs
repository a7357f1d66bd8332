//! Call accounting and fault injection around any backend
//!
//! `InstrumentedBackend` counts every call that reaches the inner backend and
//! tracks the bytes held by live handles. It can also simulate a system memory
//! ceiling and inject one-off allocation failures, which is how pool owners and
//! tests verify "every buffer released exactly once" and exercise back-off paths.

use crate::backend::BufferBackend;
use crate::error::{BackendError, Result};
use crate::handle::BufferHandle;
use log::debug;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of backend call counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackendCounters {
    /// Successful `allocate` calls
    pub allocations: usize,
    /// `allocate` calls that failed (injected, limited, or from the inner backend)
    pub failed_allocations: usize,
    /// Successful `import` calls
    pub imports: usize,
    /// Successful `map` calls
    pub maps: usize,
    /// Successful `unmap` calls
    pub unmaps: usize,
    /// `release` calls
    pub releases: usize,
    /// Handles allocated or imported and not yet released
    pub live_handles: usize,
    /// Bytes held by live handles
    pub live_bytes: usize,
}

/// Wrapper that counts calls into `B`
#[derive(Debug)]
pub struct InstrumentedBackend<B> {
    inner: B,
    /// Simulated system limit on live bytes
    system_limit: Option<usize>,
    /// Remaining allocations to fail on purpose
    fail_next: AtomicUsize,
    allocations: AtomicUsize,
    failed_allocations: AtomicUsize,
    imports: AtomicUsize,
    maps: AtomicUsize,
    unmaps: AtomicUsize,
    releases: AtomicUsize,
    live_handles: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl<B: BufferBackend> InstrumentedBackend<B> {
    /// Wrap `inner` with no limit
    #[must_use]
    pub const fn new(inner: B) -> Self {
        Self {
            inner,
            system_limit: None,
            fail_next: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            failed_allocations: AtomicUsize::new(0),
            imports: AtomicUsize::new(0),
            maps: AtomicUsize::new(0),
            unmaps: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            live_handles: AtomicUsize::new(0),
            live_bytes: AtomicUsize::new(0),
        }
    }

    /// Fail allocations once live bytes would exceed `limit`
    #[must_use]
    pub const fn with_system_limit(mut self, limit: usize) -> Self {
        self.system_limit = Some(limit);
        self
    }

    /// Make the next `count` allocations fail with [`BackendError::Exhausted`]
    pub fn fail_next_allocations(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// The wrapped backend
    #[must_use]
    pub const fn inner(&self) -> &B {
        &self.inner
    }

    /// Current call counts
    #[must_use]
    pub fn counters(&self) -> BackendCounters {
        BackendCounters {
            allocations: self.allocations.load(Ordering::SeqCst),
            failed_allocations: self.failed_allocations.load(Ordering::SeqCst),
            imports: self.imports.load(Ordering::SeqCst),
            maps: self.maps.load(Ordering::SeqCst),
            unmaps: self.unmaps.load(Ordering::SeqCst),
            releases: self.releases.load(Ordering::SeqCst),
            live_handles: self.live_handles.load(Ordering::SeqCst),
            live_bytes: self.live_bytes.load(Ordering::SeqCst),
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Reserve `size` live bytes against the simulated limit
    fn reserve(&self, size: usize) -> Result<()> {
        let Some(limit) = self.system_limit else {
            self.live_bytes.fetch_add(size, Ordering::SeqCst);
            return Ok(());
        };
        self.live_bytes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                live.checked_add(size).filter(|&total| total <= limit)
            })
            .map(|_| ())
            .map_err(|live| BackendError::Exhausted {
                requested: size,
                live,
                limit,
            })
    }

    fn fail(&self, err: BackendError) -> Result<BufferHandle> {
        self.failed_allocations.fetch_add(1, Ordering::SeqCst);
        debug!("instrumented allocation failed: {}", err);
        Err(err)
    }
}

impl<B: BufferBackend> BufferBackend for InstrumentedBackend<B> {
    fn allocate(&self, size: usize) -> Result<BufferHandle> {
        if self.take_injected_failure() {
            return self.fail(BackendError::Exhausted {
                requested: size,
                live: self.live_bytes.load(Ordering::SeqCst),
                limit: self.system_limit.unwrap_or(0),
            });
        }
        if let Err(err) = self.reserve(size) {
            return self.fail(err);
        }
        match self.inner.allocate(size) {
            Ok(handle) => {
                self.allocations.fetch_add(1, Ordering::SeqCst);
                self.live_handles.fetch_add(1, Ordering::SeqCst);
                Ok(handle)
            }
            Err(err) => {
                self.live_bytes.fetch_sub(size, Ordering::SeqCst);
                self.fail(err)
            }
        }
    }

    fn import(&self, fd: RawFd, size: usize) -> Result<BufferHandle> {
        let handle = self.inner.import(fd, size)?;
        self.imports.fetch_add(1, Ordering::SeqCst);
        self.live_handles.fetch_add(1, Ordering::SeqCst);
        self.live_bytes.fetch_add(handle.size(), Ordering::SeqCst);
        Ok(handle)
    }

    fn map(&self, handle: &mut BufferHandle) -> Result<NonNull<u8>> {
        let addr = self.inner.map(handle)?;
        self.maps.fetch_add(1, Ordering::SeqCst);
        Ok(addr)
    }

    fn unmap(&self, handle: &mut BufferHandle) -> Result<()> {
        let was_mapped = handle.is_mapped();
        self.inner.unmap(handle)?;
        if was_mapped {
            self.unmaps.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn descriptor(&self, handle: &BufferHandle) -> RawFd {
        self.inner.descriptor(handle)
    }

    fn release(&self, handle: BufferHandle) {
        let size = handle.size();
        self.inner.release(handle);
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.live_handles.fetch_sub(1, Ordering::SeqCst);
        self.live_bytes.fetch_sub(size, Ordering::SeqCst);
    }
}
