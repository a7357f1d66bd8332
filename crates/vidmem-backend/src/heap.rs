//! Portable backend serving page-aligned heap memory
//!
//! Descriptors handed out by this backend are synthetic: they identify a region
//! inside this process only and cannot be shared with another process. Useful on
//! platforms without memfd and in tests, where no real descriptors should leak.

use crate::backend::BufferBackend;
use crate::error::{BackendError, Result};
use crate::handle::{BufferHandle, HandleOrigin};
use log::{debug, warn};
use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::collections::HashMap;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicI32, Ordering};

/// Alignment for every region (one page)
const PAGE_ALIGN: usize = 4096;

/// First synthetic descriptor; far above anything the process will open
const FIRST_SYNTHETIC_FD: RawFd = 1 << 20;

/// One live heap region
struct Region {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: the region is only dereferenced by handle holders; the table just stores it
unsafe impl Send for Region {}

/// Heap-backed [`BufferBackend`]
pub struct HeapBackend {
    /// Live regions by synthetic descriptor
    regions: Mutex<HashMap<RawFd, Region>>,
    /// Next synthetic descriptor
    next_fd: AtomicI32,
}

impl HeapBackend {
    /// Create an empty heap backend
    #[must_use]
    pub fn new() -> Self {
        Self {
            regions: Mutex::new(HashMap::new()),
            next_fd: AtomicI32::new(FIRST_SYNTHETIC_FD),
        }
    }

    /// Number of regions not yet released
    #[must_use]
    pub fn live_regions(&self) -> usize {
        self.regions.lock().len()
    }

    fn create_region(&self, size: usize, origin: HandleOrigin) -> Result<BufferHandle> {
        if size == 0 {
            return Err(BackendError::InvalidSize(size));
        }
        let layout =
            Layout::from_size_align(size, PAGE_ALIGN).map_err(|_| BackendError::InvalidSize(size))?;

        // SAFETY: layout has non-zero size and a power-of-two alignment
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| BackendError::Allocate {
            size,
            source: std::io::Error::from(std::io::ErrorKind::OutOfMemory),
        })?;

        let fd = self.next_fd.fetch_add(1, Ordering::Relaxed);
        self.regions.lock().insert(fd, Region { ptr, layout });
        Ok(BufferHandle::new(fd, size, origin))
    }
}

impl Default for HeapBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HeapBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapBackend")
            .field("live_regions", &self.live_regions())
            .finish_non_exhaustive()
    }
}

impl BufferBackend for HeapBackend {
    fn allocate(&self, size: usize) -> Result<BufferHandle> {
        let handle = self.create_region(size, HandleOrigin::Allocated)?;
        debug!("heap allocated fd={} size={}", handle.fd(), size);
        Ok(handle)
    }

    fn import(&self, fd: RawFd, size: usize) -> Result<BufferHandle> {
        // Heap memory cannot alias a foreign descriptor; the import gets its own zeroed region.
        let handle = self.create_region(size, HandleOrigin::Imported)?;
        debug!("heap imported fd={} as fd={} size={}", fd, handle.fd(), size);
        Ok(handle)
    }

    fn map(&self, handle: &mut BufferHandle) -> Result<NonNull<u8>> {
        if let Some(addr) = handle.addr() {
            return Ok(addr);
        }
        let addr = self
            .regions
            .lock()
            .get(&handle.fd())
            .map(|region| region.ptr)
            .ok_or_else(|| BackendError::Map {
                fd: handle.fd(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })?;
        handle.set_mapped(addr);
        Ok(addr)
    }

    fn unmap(&self, handle: &mut BufferHandle) -> Result<()> {
        handle.clear_mapped();
        Ok(())
    }

    fn release(&self, mut handle: BufferHandle) {
        handle.clear_mapped();
        let Some(region) = self.regions.lock().remove(&handle.fd()) else {
            warn!("heap release of unknown fd={}", handle.fd());
            return;
        };
        // SAFETY: region was allocated in create_region with exactly this layout
        unsafe { dealloc(region.ptr.as_ptr(), region.layout) };
        debug!("heap released fd={} size={}", handle.fd(), handle.size());
    }
}

impl Drop for HeapBackend {
    fn drop(&mut self) {
        let regions = std::mem::take(self.regions.get_mut());
        if !regions.is_empty() {
            warn!("heap backend dropped with {} live regions", regions.len());
        }
        for region in regions.into_values() {
            // SAFETY: each region was allocated with its stored layout and never freed
            unsafe { dealloc(region.ptr.as_ptr(), region.layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_heap_allocate_is_zeroed_and_aligned() {
        let backend = HeapBackend::new();
        let mut handle = backend.allocate(10_000).unwrap();
        let addr = backend.map(&mut handle).unwrap();

        assert_eq!(addr.as_ptr() as usize % PAGE_ALIGN, 0);
        // SAFETY: region is 10_000 bytes long
        unsafe {
            assert_eq!(*addr.as_ptr(), 0);
            assert_eq!(*addr.as_ptr().add(9_999), 0);
        }

        assert_eq!(backend.live_regions(), 1);
        backend.release(handle);
        assert_eq!(backend.live_regions(), 0);
    }

    #[test]
    fn test_heap_descriptors_are_unique() {
        let backend = HeapBackend::new();
        let a = backend.allocate(4096).unwrap();
        let b = backend.import(a.fd(), 4096).unwrap();
        assert_ne!(a.fd(), b.fd());
        assert_eq!(b.origin(), HandleOrigin::Imported);
        backend.release(a);
        backend.release(b);
    }

    #[test]
    fn test_heap_unmap_then_map_returns_same_region() {
        let backend = HeapBackend::new();
        let mut handle = backend.allocate(4096).unwrap();
        let first = backend.map(&mut handle).unwrap();
        backend.unmap(&mut handle).unwrap();
        assert!(!handle.is_mapped());
        let second = backend.map(&mut handle).unwrap();
        assert_eq!(first, second);
        backend.release(handle);
    }

    #[test]
    fn test_heap_zero_size_rejected() {
        let backend = HeapBackend::new();
        assert!(matches!(
            backend.allocate(0),
            Err(BackendError::InvalidSize(0))
        ));
    }
}
