//! Error types for pool operations

use crate::block::BlockId;
use std::io;
use std::time::Duration;
use thiserror::Error;
use vidmem_backend::BackendError;

/// Errors returned by [`crate::BufferPool`] and its helpers
#[derive(Debug, Error)]
pub enum PoolError {
    /// No block became free within the wait window; try again shortly
    #[error("no buffer became available within {waited:?}")]
    AcquireTimeout {
        /// How long the caller waited
        waited: Duration,
    },

    /// The id is not held by anyone (double release or stale id)
    #[error("block {0} not found: released twice or stale id")]
    BlockNotFound(BlockId),

    /// The backend failed to import, map or allocate a buffer
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The pool is closing and accepts no new work
    #[error("pool is closing")]
    Closed,

    /// Options rejected by validation
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// A background thread could not be started
    #[error("failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        /// Thread role
        name: &'static str,
        /// Underlying OS error
        #[source]
        source: io::Error,
    },
}

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

impl PoolError {
    /// Whether retrying the same call later may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AcquireTimeout { .. } => true,
            Self::Backend(err) => err.is_exhaustion(),
            _ => false,
        }
    }

    /// Whether the error indicates a bug in the caller
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self, Self::BlockNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_classification() {
        let timeout = PoolError::AcquireTimeout {
            waited: Duration::from_millis(1000),
        };
        assert!(timeout.is_retryable());
        assert!(!timeout.is_contract_violation());

        let missing = PoolError::BlockNotFound(BlockId::new(3, 1));
        assert!(missing.is_contract_violation());
        assert!(!missing.is_retryable());

        let exhausted = PoolError::from(BackendError::Exhausted {
            requested: 1,
            live: 1,
            limit: 1,
        });
        assert!(exhausted.is_retryable());
        assert!(!PoolError::Backend(BackendError::InvalidSize(0)).is_retryable());
        assert!(!PoolError::Closed.is_retryable());
    }

    #[test]
    fn test_messages() {
        let missing = PoolError::BlockNotFound(BlockId::new(3, 1));
        assert!(missing.to_string().contains("3v1"));
        let timeout = PoolError::AcquireTimeout {
            waited: Duration::from_millis(250),
        };
        assert!(timeout.to_string().contains("250ms"));
    }
}
