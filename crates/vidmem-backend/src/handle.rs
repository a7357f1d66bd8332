//! Opaque handle to one backend-owned memory region

use std::os::fd::RawFd;
use std::ptr::NonNull;

/// How the region behind a handle came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOrigin {
    /// Freshly allocated by the backend
    Allocated,
    /// Wrapped from a descriptor owned elsewhere
    Imported,
}

/// One system-allocated (or imported) memory region
///
/// The handle carries the native descriptor used for sharing the buffer with
/// another process or subsystem, the region size, and the virtual address while
/// mapped. It is created and destroyed only by a [`crate::BufferBackend`]; holders
/// move it around but never interpret its bytes.
#[derive(Debug)]
pub struct BufferHandle {
    /// Native descriptor (memfd, dma-buf, or a synthetic id for heap buffers)
    fd: RawFd,
    /// Region size in bytes
    size: usize,
    /// Virtual address while mapped
    addr: Option<NonNull<u8>>,
    /// Allocation origin
    origin: HandleOrigin,
}

// SAFETY: the handle only names a region; access to the mapped bytes is
// coordinated by whoever holds the handle, never through the handle itself.
unsafe impl Send for BufferHandle {}
// SAFETY: all methods taking `&self` are plain reads of immutable fields.
unsafe impl Sync for BufferHandle {}

impl BufferHandle {
    /// Create an unmapped handle
    ///
    /// Only backends should construct handles.
    #[must_use]
    pub const fn new(fd: RawFd, size: usize, origin: HandleOrigin) -> Self {
        Self {
            fd,
            size,
            addr: None,
            origin,
        }
    }

    /// Native descriptor
    #[must_use]
    pub const fn fd(&self) -> RawFd {
        self.fd
    }

    /// Region size in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Virtual address, if mapped
    #[must_use]
    pub const fn addr(&self) -> Option<NonNull<u8>> {
        self.addr
    }

    /// Whether the region is currently mapped
    #[must_use]
    pub const fn is_mapped(&self) -> bool {
        self.addr.is_some()
    }

    /// Allocation origin
    #[must_use]
    pub const fn origin(&self) -> HandleOrigin {
        self.origin
    }

    /// Record the mapping established by a backend
    pub fn set_mapped(&mut self, addr: NonNull<u8>) {
        self.addr = Some(addr);
    }

    /// Forget the mapping after a backend unmapped the region
    pub fn clear_mapped(&mut self) -> Option<NonNull<u8>> {
        self.addr.take()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_mapping_bookkeeping() {
        let mut handle = BufferHandle::new(7, 4096, HandleOrigin::Allocated);
        assert!(!handle.is_mapped());

        let mut byte = 0u8;
        let addr = NonNull::from(&mut byte);
        handle.set_mapped(addr);
        assert_eq!(handle.addr(), Some(addr));

        assert_eq!(handle.clear_mapped(), Some(addr));
        assert!(!handle.is_mapped());
        assert_eq!(handle.fd(), 7);
        assert_eq!(handle.size(), 4096);
        assert_eq!(handle.origin(), HandleOrigin::Allocated);
    }
}
