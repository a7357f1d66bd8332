//! # vidmem-backend
//!
//! Backing-buffer providers for `vidmem-pool`:
//! - [`BufferBackend`] - the contract the pool consumes (allocate, import, map,
//!   unmap, descriptor lookup, release)
//! - [`MemfdBackend`] - anonymous shareable memory (`memfd_create` + `mmap`), Linux only
//! - [`HeapBackend`] - page-aligned heap memory with synthetic descriptors, portable
//! - [`InstrumentedBackend`] - wraps any backend with call accounting, a simulated
//!   system memory limit and failure injection
//!
//! The pool never interprets the bytes behind a [`BufferHandle`]; it only moves
//! handles between its lists and hands them back to the backend for teardown.
//!
//! ## Example
//!
//! ```rust
//! use vidmem_backend::{BufferBackend, HeapBackend};
//!
//! # fn main() -> vidmem_backend::Result<()> {
//! let backend = HeapBackend::new();
//! let mut handle = backend.allocate(64 * 1024)?;
//! let addr = backend.map(&mut handle)?;
//! assert_eq!(handle.addr(), Some(addr));
//! backend.release(handle);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod handle;
pub mod heap;
pub mod instrumented;
#[cfg(target_os = "linux")]
pub mod memfd;

pub use backend::BufferBackend;
pub use error::{BackendError, Result};
pub use handle::{BufferHandle, HandleOrigin};
pub use heap::HeapBackend;
pub use instrumented::{BackendCounters, InstrumentedBackend};
#[cfg(target_os = "linux")]
pub use memfd::MemfdBackend;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
