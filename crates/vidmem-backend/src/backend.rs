//! The contract between the pool and whatever provides its memory

use crate::error::Result;
use crate::handle::BufferHandle;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::Arc;

/// Provider of shareable memory regions
///
/// Implementations allocate or import a region, map it for CPU access and tear
/// it down again. The pool calls these from arbitrary threads, including its
/// background allocator thread, so implementations must be thread-safe.
///
/// # Example
///
/// ```rust
/// use std::os::fd::RawFd;
/// use std::ptr::NonNull;
/// use vidmem_backend::{BufferBackend, BufferHandle, HeapBackend, Result};
///
/// /// Logs every release before delegating
/// struct Logged(HeapBackend);
///
/// impl BufferBackend for Logged {
///     fn allocate(&self, size: usize) -> Result<BufferHandle> {
///         self.0.allocate(size)
///     }
///     fn import(&self, fd: RawFd, size: usize) -> Result<BufferHandle> {
///         self.0.import(fd, size)
///     }
///     fn map(&self, handle: &mut BufferHandle) -> Result<NonNull<u8>> {
///         self.0.map(handle)
///     }
///     fn unmap(&self, handle: &mut BufferHandle) -> Result<()> {
///         self.0.unmap(handle)
///     }
///     fn release(&self, handle: BufferHandle) {
///         println!("releasing fd {}", handle.fd());
///         self.0.release(handle);
///     }
/// }
/// ```
pub trait BufferBackend: Send + Sync {
    /// Allocate a fresh region of `size` bytes
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or the system cannot provide the memory.
    fn allocate(&self, size: usize) -> Result<BufferHandle>;

    /// Wrap a region owned elsewhere, identified by its descriptor
    ///
    /// The returned handle holds its own reference; the caller keeps ownership
    /// of `fd`.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero or the descriptor cannot be imported.
    fn import(&self, fd: RawFd, size: usize) -> Result<BufferHandle>;

    /// Map the region for CPU access, returning its address
    ///
    /// Mapping an already mapped handle returns the existing address.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping cannot be established.
    fn map(&self, handle: &mut BufferHandle) -> Result<NonNull<u8>>;

    /// Remove the CPU mapping; a no-op for unmapped handles
    ///
    /// # Errors
    ///
    /// Returns an error if the system refuses to unmap the region.
    fn unmap(&self, handle: &mut BufferHandle) -> Result<()>;

    /// Descriptor for sharing the region with another process or subsystem
    fn descriptor(&self, handle: &BufferHandle) -> RawFd {
        handle.fd()
    }

    /// Final teardown; unmaps first if the handle is still mapped
    fn release(&self, handle: BufferHandle);
}

impl<B: BufferBackend + ?Sized> BufferBackend for Arc<B> {
    fn allocate(&self, size: usize) -> Result<BufferHandle> {
        (**self).allocate(size)
    }

    fn import(&self, fd: RawFd, size: usize) -> Result<BufferHandle> {
        (**self).import(fd, size)
    }

    fn map(&self, handle: &mut BufferHandle) -> Result<NonNull<u8>> {
        (**self).map(handle)
    }

    fn unmap(&self, handle: &mut BufferHandle) -> Result<()> {
        (**self).unmap(handle)
    }

    fn descriptor(&self, handle: &BufferHandle) -> RawFd {
        (**self).descriptor(handle)
    }

    fn release(&self, handle: BufferHandle) {
        (**self).release(handle);
    }
}
