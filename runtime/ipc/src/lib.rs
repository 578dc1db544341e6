//! Shared Memory IPC - Application core <-> co-processor messaging
//!
//! # Purpose
//! Moves short notification payloads (virtqueue indices) between the ARM
//! application core and the Atlas7 co-processor through a region of shared
//! memory. The two sides share no coherent atomics, so every update of the
//! ring runs under a hardware spinlock.
//!
//! # Integration Points
//! - Depends on: `atlas-hwspinlock` (cross-processor lock), a shared
//!   memory region, a doorbell (interrupt register or host event)
//! - Provides to: remote processor glue (virtqueue kicks)
//!
//! # Architecture
//! ```text
//! ┌───────────┬──────────────────────────────────────┐
//! │ count u32 │ data (capacity bytes, circular)      │
//! └───────────┴──────────────────────────────────────┘
//! ```
//! Only `count` is shared. Each peer keeps its own cursor: the writer its
//! write position, the reader its read position. A write or read holds the
//! hardware lock for the whole read-modify-write of `count` and the data
//! copy, then the writer fences and rings the peer's doorbell.
//!
//! # Design
//! - [`ShmemFifo`]: the shared state, split into a [`FifoWriter`] and a
//!   [`FifoReader`] endpoint
//! - [`VqKicker`] / [`VqDispatcher`]: 32-bit virtqueue index transport
//! - [`RprocIpc`]: the subsystem context holding both directions
//!
//! `Busy` and `Empty` are expected back-pressure; a lock timeout means the
//! peers lost synchrony and the channel must be reset.

use thiserror::Error;

pub use atlas_hwspinlock::{HwLock, HwLockError, LockId};

pub mod config;
pub mod context;
pub mod doorbell;
pub mod fifo;
pub mod shmem;
pub mod sim;
pub mod vq;

pub use config::{FifoConfig, RprocConfig};
pub use context::RprocIpc;
pub use doorbell::{
    CountingDoorbell, Doorbell, DoorbellListener, EventDoorbell, NoDoorbell, RegisterDoorbell,
};
pub use fifo::{FifoReader, FifoStats, FifoWriter, ShmemFifo, HEADER_SIZE};
pub use shmem::{HeapRegion, MappedRegion, SharedMemory};
pub use vq::{VqDispatcher, VqKicker};

/// Data path errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FifoError {
    /// Payload larger than the whole ring
    #[error("payload of {len} bytes exceeds FIFO capacity {capacity}")]
    Overflow { len: usize, capacity: usize },

    /// Peer has not drained enough space yet
    #[error("FIFO busy: {len} bytes requested, {free} free")]
    Busy { len: usize, free: usize },

    /// Nothing to read
    #[error("FIFO empty")]
    Empty,

    /// Shared count header holds an impossible value
    #[error("FIFO corrupt: count {count} exceeds capacity {capacity}")]
    Corrupt { count: usize, capacity: usize },

    /// Cross-processor lock failure
    #[error("FIFO lock: {0}")]
    Lock(#[from] HwLockError),
}

impl FifoError {
    /// Back-pressure the caller may retry after
    pub fn is_retryable(&self) -> bool {
        matches!(self, FifoError::Busy { .. } | FifoError::Empty)
    }

    /// Loss of synchrony with the peer: the channel needs a hard reset
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FifoError::Lock(HwLockError::Timeout { .. }) | FifoError::Corrupt { .. }
        )
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("shared region of {len} bytes too small, need {required}")]
    RegionTooSmall { len: usize, required: usize },
}

/// Subsystem setup and teardown errors
#[derive(Debug, Error)]
pub enum IpcError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("hwspinlock: {0}")]
    Lock(#[from] HwLockError),

    #[error(transparent)]
    Fifo(#[from] FifoError),

    #[error("{0} endpoint already taken")]
    EndpointTaken(&'static str),
}

pub type Result<T> = core::result::Result<T, FifoError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_classification() {
        assert!(FifoError::Empty.is_retryable());
        assert!(FifoError::Busy { len: 4, free: 0 }.is_retryable());
        assert!(!FifoError::Overflow { len: 9, capacity: 8 }.is_retryable());

        let timeout = FifoError::from(HwLockError::Timeout {
            id: LockId(1),
            waited: Duration::from_millis(10),
        });
        assert!(timeout.is_fatal());
        assert!(!timeout.is_retryable());
        assert!(!FifoError::Empty.is_fatal());
        assert!(FifoError::Corrupt { count: 9, capacity: 8 }.is_fatal());
    }
}
