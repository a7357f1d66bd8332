//! Error types for backing-buffer operations

use std::io;
use std::os::fd::RawFd;
use thiserror::Error;

/// Errors raised by a [`crate::BufferBackend`]
#[derive(Debug, Error)]
pub enum BackendError {
    /// Zero-sized buffers are never valid
    #[error("invalid buffer size: {0}")]
    InvalidSize(usize),

    /// The system refused to provide a fresh buffer
    #[error("failed to allocate {size} byte buffer: {source}")]
    Allocate {
        /// Requested size in bytes
        size: usize,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// A buffer owned elsewhere could not be wrapped
    #[error("failed to import descriptor {fd}: {source}")]
    Import {
        /// Descriptor supplied by the caller
        fd: RawFd,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Mapping the buffer into the address space failed
    #[error("failed to map descriptor {fd}: {source}")]
    Map {
        /// Descriptor of the buffer being mapped
        fd: RawFd,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// Unmapping the buffer failed
    #[error("failed to unmap descriptor {fd}: {source}")]
    Unmap {
        /// Descriptor of the buffer being unmapped
        fd: RawFd,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },

    /// The (possibly simulated) system memory limit was reached
    #[error("backend exhausted: requested {requested} bytes with {live} live of {limit} limit")]
    Exhausted {
        /// Requested size in bytes
        requested: usize,
        /// Bytes currently held by live handles
        live: usize,
        /// Configured limit in bytes
        limit: usize,
    },
}

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

impl BackendError {
    /// Whether the failure is memory pressure that may clear once buffers are released
    #[must_use]
    pub fn is_exhaustion(&self) -> bool {
        match self {
            Self::Exhausted { .. } => true,
            Self::Allocate { source, .. } => {
                source.kind() == io::ErrorKind::OutOfMemory
                    || source.raw_os_error() == Some(libc::ENOMEM)
            }
            _ => false,
        }
    }
}

/// Build an [`BackendError::Allocate`] from the last OS error
#[cfg(target_os = "linux")]
pub(crate) fn allocate_error(size: usize) -> BackendError {
    BackendError::Allocate {
        size,
        source: io::Error::last_os_error(),
    }
}

/// Build an [`BackendError::Import`] from the last OS error
#[cfg(target_os = "linux")]
pub(crate) fn import_error(fd: RawFd) -> BackendError {
    BackendError::Import {
        fd,
        source: io::Error::last_os_error(),
    }
}

/// Build an [`BackendError::Map`] from the last OS error
#[cfg(target_os = "linux")]
pub(crate) fn map_error(fd: RawFd) -> BackendError {
    BackendError::Map {
        fd,
        source: io::Error::last_os_error(),
    }
}

/// Build an [`BackendError::Unmap`] from the last OS error
#[cfg(target_os = "linux")]
pub(crate) fn unmap_error(fd: RawFd) -> BackendError {
    BackendError::Unmap {
        fd,
        source: io::Error::last_os_error(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_exhaustion_classification() {
        let exhausted = BackendError::Exhausted {
            requested: 10,
            live: 90,
            limit: 95,
        };
        assert!(exhausted.is_exhaustion());

        let oom = BackendError::Allocate {
            size: 10,
            source: io::Error::from_raw_os_error(libc::ENOMEM),
        };
        assert!(oom.is_exhaustion());

        let bad_fd = BackendError::Import {
            fd: -1,
            source: io::Error::from_raw_os_error(libc::EBADF),
        };
        assert!(!bad_fd.is_exhaustion());
        assert!(!BackendError::InvalidSize(0).is_exhaustion());
    }

    #[test]
    fn test_error_messages_name_the_descriptor() {
        let err = BackendError::Map {
            fd: 42,
            source: io::Error::from_raw_os_error(libc::EINVAL),
        };
        assert!(err.to_string().contains("descriptor 42"));
    }
}
