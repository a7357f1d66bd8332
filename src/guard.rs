//! RAII ownership of an acquired block
//!
//! A `BlockGuard` is one reference on a block: cloning retains, dropping
//! releases. The guard keeps the pool's shared state alive, so a pool closed
//! while guards are outstanding finishes its teardown on the last drop.

use crate::block::BlockId;
use crate::pool::{PoolId, PoolShared};
use std::fmt;
use std::os::fd::RawFd;
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::error;

/// One reference on a checked-out block
///
/// The mapping behind [`Self::as_ptr`] stays valid for as long as any
/// reference on the block exists. Cloned guards alias the same memory;
/// coordinating writes between them is up to the caller, as with any buffer
/// shared with hardware or another process.
pub struct BlockGuard {
    pool: Arc<PoolShared>,
    id: BlockId,
    descriptor: RawFd,
    size: usize,
    addr: Option<NonNull<u8>>,
    armed: bool,
}

// SAFETY: the mapping is owned by the pool and outlives every reference on the
// block; the guard itself only carries the address.
unsafe impl Send for BlockGuard {}
// SAFETY: shared access only exposes the raw address and immutable metadata
unsafe impl Sync for BlockGuard {}

impl BlockGuard {
    pub(crate) fn new(
        pool: Arc<PoolShared>,
        id: BlockId,
        descriptor: RawFd,
        size: usize,
        addr: Option<NonNull<u8>>,
    ) -> Self {
        Self {
            pool,
            id,
            descriptor,
            size,
            addr,
            armed: true,
        }
    }

    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Buffer size in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Descriptor for sharing the buffer with another process or subsystem
    #[must_use]
    pub const fn descriptor(&self) -> RawFd {
        self.descriptor
    }

    /// Start of the CPU mapping, or null if the backend left it unmapped
    #[must_use]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.map_or(std::ptr::null_mut(), NonNull::as_ptr)
    }

    #[must_use]
    pub fn pool_id(&self) -> PoolId {
        self.pool.id()
    }

    /// Detach into a raw id without releasing
    ///
    /// The reference is now managed with `BufferPool::retain` and
    /// `BufferPool::release`.
    #[must_use]
    pub fn into_id(mut self) -> BlockId {
        self.armed = false;
        self.id
    }
}

impl Clone for BlockGuard {
    fn clone(&self) -> Self {
        let armed = match self.pool.retain(self.id) {
            Ok(()) => true,
            Err(err) => {
                error!("{} failed to retain block {}: {}", self.pool.id(), self.id, err);
                false
            }
        };
        Self {
            pool: Arc::clone(&self.pool),
            id: self.id,
            descriptor: self.descriptor,
            size: self.size,
            addr: self.addr,
            armed,
        }
    }
}

impl Drop for BlockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(err) = self.pool.release(self.id) {
            error!("{} failed to release block {}: {}", self.pool.id(), self.id, err);
        }
    }
}

impl fmt::Debug for BlockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockGuard")
            .field("pool", &self.pool.id())
            .field("id", &self.id)
            .field("descriptor", &self.descriptor)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
