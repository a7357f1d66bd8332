//! Shareable buffers backed by anonymous memory files
//!
//! Each buffer is a `memfd` sized with `ftruncate` and mapped `MAP_SHARED`, so
//! the descriptor can be handed to another process (or a display/codec driver
//! that accepts memfds) and both sides see the same pages. Importing duplicates
//! the caller's descriptor, so the pool always owns a reference of its own.

use crate::backend::BufferBackend;
use crate::error::{allocate_error, import_error, map_error, unmap_error, BackendError, Result};
use crate::handle::{BufferHandle, HandleOrigin};
use log::{debug, warn};
use std::io;
use std::os::fd::RawFd;
use std::ptr::NonNull;

/// Name shown for pool buffers in `/proc/<pid>/fd`
const MEMFD_NAME: &std::ffi::CStr = c"vidmem-pool";

/// Linux backend allocating buffers with `memfd_create`
#[derive(Debug, Default, Clone, Copy)]
pub struct MemfdBackend;

impl MemfdBackend {
    /// Create a new memfd backend
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

/// Close a descriptor, logging (not failing) on error
fn close_fd(fd: RawFd) {
    // SAFETY: fd is owned by the handle being torn down and closed exactly once
    if unsafe { libc::close(fd) } != 0 {
        warn!("close({}) failed: {}", fd, io::Error::last_os_error());
    }
}

/// Current size of the file behind `fd`
fn file_size(fd: RawFd) -> io::Result<usize> {
    let mut stat = std::mem::MaybeUninit::<libc::stat>::uninit();
    // SAFETY: fd is a descriptor we own and `stat` is valid for writes
    if unsafe { libc::fstat(fd, stat.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: fstat succeeded and filled the struct
    let stat = unsafe { stat.assume_init() };
    usize::try_from(stat.st_size).map_err(|_| io::Error::from_raw_os_error(libc::EOVERFLOW))
}

impl BufferBackend for MemfdBackend {
    fn allocate(&self, size: usize) -> Result<BufferHandle> {
        if size == 0 {
            return Err(BackendError::InvalidSize(size));
        }
        let len = libc::off_t::try_from(size).map_err(|_| BackendError::InvalidSize(size))?;

        // SAFETY: name is a valid NUL-terminated string
        let fd = unsafe { libc::memfd_create(MEMFD_NAME.as_ptr(), libc::MFD_CLOEXEC) };
        if fd < 0 {
            return Err(allocate_error(size));
        }

        // SAFETY: fd was just created and is owned here
        if unsafe { libc::ftruncate(fd, len) } != 0 {
            let err = allocate_error(size);
            close_fd(fd);
            return Err(err);
        }

        debug!("memfd allocated fd={} size={}", fd, size);
        Ok(BufferHandle::new(fd, size, HandleOrigin::Allocated))
    }

    fn import(&self, fd: RawFd, size: usize) -> Result<BufferHandle> {
        if size == 0 {
            return Err(BackendError::InvalidSize(size));
        }
        if fd < 0 {
            return Err(BackendError::Import {
                fd,
                source: io::Error::from_raw_os_error(libc::EBADF),
            });
        }

        // SAFETY: duplicating leaves `fd` untouched and owned by the caller
        let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 0) };
        if dup < 0 {
            return Err(import_error(fd));
        }

        // A mapping past the end of the file faults on first touch
        let file_size = match file_size(dup) {
            Ok(file_size) => file_size,
            Err(source) => {
                close_fd(dup);
                return Err(BackendError::Import { fd, source });
            }
        };
        if file_size < size {
            close_fd(dup);
            warn!(
                "memfd import of fd={} rejected: {} bytes requested, file has {}",
                fd, size, file_size
            );
            return Err(BackendError::Import {
                fd,
                source: io::Error::from_raw_os_error(libc::EINVAL),
            });
        }

        debug!("memfd imported fd={} as fd={} size={}", fd, dup, size);
        Ok(BufferHandle::new(dup, size, HandleOrigin::Imported))
    }

    fn map(&self, handle: &mut BufferHandle) -> Result<NonNull<u8>> {
        if let Some(addr) = handle.addr() {
            return Ok(addr);
        }

        // SAFETY: a fresh shared mapping of a descriptor we own; the kernel picks the address
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                handle.size(),
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                handle.fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(map_error(handle.fd()));
        }

        let addr = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| map_error(handle.fd()))?;
        handle.set_mapped(addr);
        Ok(addr)
    }

    fn unmap(&self, handle: &mut BufferHandle) -> Result<()> {
        let Some(addr) = handle.addr() else {
            return Ok(());
        };

        // SAFETY: addr/size describe the mapping created in `map`
        if unsafe { libc::munmap(addr.as_ptr().cast(), handle.size()) } != 0 {
            return Err(unmap_error(handle.fd()));
        }
        handle.clear_mapped();
        Ok(())
    }

    fn release(&self, mut handle: BufferHandle) {
        if let Err(e) = self.unmap(&mut handle) {
            warn!("releasing still-mapped buffer: {}", e);
        }
        debug!("memfd released fd={} size={}", handle.fd(), handle.size());
        close_fd(handle.fd());
    }
}
