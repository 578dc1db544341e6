//! Hardware Spinlocks - Cross-processor mutual exclusion
//!
//! # Purpose
//! The application core and the companion co-processor share memory and
//! register blocks but no coherent atomic instructions. Mutual exclusion
//! between them goes through a hardware arbiter: a bank of registers where
//! a read atomically tests-and-sets a lock.
//!
//! # Integration Points
//! - Depends on: a mapped arbiter register window (or a simulator)
//! - Provides to: shared-memory FIFOs (`atlas-ipc`), the RTC I/O bridge
//!   (`atlas-iobrg`)
//!
//! # Architecture
//! [`HwLock`] is the capability interface: try once, unlock. Acquisition
//! with a bounded timeout is layered on top by [`HwLock::lock_timeout`], so
//! the hardware bank and the test simulator share the same contract. A
//! timeout never blocks forever and never touches the protected state.
//!
//! # Testing Strategy
//! - Unit tests: register decoding, request bookkeeping, timeout bound
//! - Integration tests: two threads contending through [`SimulatedArbiter`]

use core::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;

mod bank;
mod regs;
mod sim;

pub use bank::{lock_offset, HwSpinlock, HwSpinlockBank, DEFAULT_NUM_LOCKS, LOCK_BASE, LOCK_STRIDE};
pub use regs::{MmioRegisters, RegisterIo};
pub use sim::SimulatedArbiter;

/// Spins between voluntary yields while waiting for a lock
const SPINS_PER_YIELD: u32 = 64;

/// Hardware lock errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HwLockError {
    #[error("hwspinlock {id} not acquired within {waited:?}")]
    Timeout { id: LockId, waited: Duration },

    #[error("hwspinlock {id} out of range (bank has {count} locks)")]
    InvalidId { id: LockId, count: u32 },

    #[error("hwspinlock {id} already requested")]
    Busy { id: LockId },

    #[error("hwspinlock {id} belongs to another bank")]
    ForeignLock { id: LockId },
}

pub type Result<T> = core::result::Result<T, HwLockError>;

/// Index of a lock within its arbiter bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LockId(pub u32);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A lock usable by two processors that share no atomic domain
///
/// Implementations only provide a single non-blocking attempt and the
/// release. Callers normally go through [`HwLock::lock_timeout`].
pub trait HwLock: Send + Sync {
    /// Lock identifier (for diagnostics)
    fn id(&self) -> LockId;

    /// Make one acquisition attempt
    ///
    /// Returns `true` if the caller now owns the lock.
    fn try_lock(&self) -> bool;

    /// Release a lock obtained by [`HwLock::try_lock`]
    fn unlock(&self);

    /// Acquire the lock, giving up after `timeout`
    ///
    /// # Errors
    /// Returns [`HwLockError::Timeout`] if the peer still holds the lock
    /// when `timeout` has elapsed. The caller must treat this as loss of
    /// synchrony with the peer, not as a condition to retry.
    fn lock_timeout(&self, timeout: Duration) -> Result<HwLockGuard<'_, Self>> {
        let start = Instant::now();
        let mut spins: u32 = 0;

        loop {
            if self.try_lock() {
                return Ok(HwLockGuard { lock: self });
            }

            let waited = start.elapsed();
            if waited >= timeout {
                log::warn!("hwspinlock {}: timed out after {:?}", self.id(), waited);
                return Err(HwLockError::Timeout {
                    id: self.id(),
                    waited,
                });
            }

            spins = spins.wrapping_add(1);
            if spins % SPINS_PER_YIELD == 0 {
                std::thread::yield_now();
            } else {
                core::hint::spin_loop();
            }
        }
    }
}

impl<L: HwLock + ?Sized> HwLock for &L {
    fn id(&self) -> LockId {
        (**self).id()
    }

    fn try_lock(&self) -> bool {
        (**self).try_lock()
    }

    fn unlock(&self) {
        (**self).unlock()
    }
}

impl<L: HwLock + ?Sized> HwLock for std::sync::Arc<L> {
    fn id(&self) -> LockId {
        (**self).id()
    }

    fn try_lock(&self) -> bool {
        (**self).try_lock()
    }

    fn unlock(&self) {
        (**self).unlock()
    }
}

impl<L: HwLock + ?Sized> HwLock for Box<L> {
    fn id(&self) -> LockId {
        (**self).id()
    }

    fn try_lock(&self) -> bool {
        (**self).try_lock()
    }

    fn unlock(&self) {
        (**self).unlock()
    }
}

/// Held hardware lock; released on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct HwLockGuard<'a, L: HwLock + ?Sized> {
    lock: &'a L,
}

impl<L: HwLock + ?Sized> HwLockGuard<'_, L> {
    /// Identifier of the held lock
    pub fn id(&self) -> LockId {
        self.lock.id()
    }
}

impl<L: HwLock + ?Sized> Drop for HwLockGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

impl<L: HwLock + ?Sized> fmt::Debug for HwLockGuard<'_, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HwLockGuard").field("id", &self.id()).finish()
    }
}
