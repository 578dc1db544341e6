//! Hardware spinlock bank
//!
//! Lock `n` is the 32-bit register at [`LOCK_BASE`] + `n` * [`LOCK_STRIDE`].
//! Reading it returns non-zero when the read itself took the lock, zero
//! when somebody else holds it. Writing zero releases it.

use std::sync::{Arc, Mutex};

use static_assertions::const_assert;

use crate::{HwLock, HwLockError, LockId, RegisterIo, Result};

/// Offset of lock 0 within the arbiter block
pub const LOCK_BASE: usize = 0x404;

/// Distance between consecutive lock registers
pub const LOCK_STRIDE: usize = 0x4;

/// Locks implemented by the Atlas7 arbiter
pub const DEFAULT_NUM_LOCKS: u32 = 30;

// Request bookkeeping is a single u32 bitmap.
const_assert!(DEFAULT_NUM_LOCKS <= 32);

/// Register offset of lock `id`
pub const fn lock_offset(id: u32) -> usize {
    LOCK_BASE + LOCK_STRIDE * id as usize
}

/// Arbiter bank: hands out each lock at most once
pub struct HwSpinlockBank<R: RegisterIo> {
    regs: Arc<R>,
    num_locks: u32,
    requested: Mutex<u32>,
}

impl<R: RegisterIo> HwSpinlockBank<R> {
    /// Create a bank with the default lock count
    pub fn new(regs: R) -> Self {
        Self::with_locks(regs, DEFAULT_NUM_LOCKS)
    }

    /// Create a bank with `num_locks` locks (at most 32)
    pub fn with_locks(regs: R, num_locks: u32) -> Self {
        assert!(num_locks <= 32, "hwspinlock bank limited to 32 locks");
        log::debug!("hwspinlock: bank with {} locks", num_locks);
        Self {
            regs: Arc::new(regs),
            num_locks,
            requested: Mutex::new(0),
        }
    }

    /// Number of locks in the bank
    pub fn num_locks(&self) -> u32 {
        self.num_locks
    }

    /// Shared handle to the register window
    pub fn registers(&self) -> &Arc<R> {
        &self.regs
    }

    /// Request a specific lock
    ///
    /// # Errors
    /// - [`HwLockError::InvalidId`] if `id` is outside the bank
    /// - [`HwLockError::Busy`] if the lock is already handed out
    pub fn request(&self, id: u32) -> Result<HwSpinlock<R>> {
        if id >= self.num_locks {
            return Err(HwLockError::InvalidId {
                id: LockId(id),
                count: self.num_locks,
            });
        }

        let mut requested = self.requested.lock().unwrap_or_else(|e| e.into_inner());
        let bit = 1u32 << id;
        if *requested & bit != 0 {
            return Err(HwLockError::Busy { id: LockId(id) });
        }
        *requested |= bit;

        Ok(HwSpinlock {
            id: LockId(id),
            regs: Arc::clone(&self.regs),
        })
    }

    /// Return a lock to the bank
    ///
    /// # Errors
    /// [`HwLockError::ForeignLock`] if `lock` was requested from another
    /// bank; this bank's bookkeeping is left alone.
    pub fn free(&self, lock: HwSpinlock<R>) -> Result<()> {
        if !Arc::ptr_eq(&lock.regs, &self.regs) {
            log::error!("hwspinlock {}: freed through the wrong bank", lock.id);
            return Err(HwLockError::ForeignLock { id: lock.id });
        }

        let mut requested = self.requested.lock().unwrap_or_else(|e| e.into_inner());
        *requested &= !(1u32 << lock.id.0);
        log::debug!("hwspinlock {}: freed", lock.id);
        Ok(())
    }

    /// Whether lock `id` is currently handed out
    pub fn is_requested(&self, id: u32) -> bool {
        id < self.num_locks
            && *self.requested.lock().unwrap_or_else(|e| e.into_inner()) & (1u32 << id) != 0
    }
}

/// One lock taken from a [`HwSpinlockBank`]
pub struct HwSpinlock<R: RegisterIo> {
    id: LockId,
    regs: Arc<R>,
}

impl<R: RegisterIo> HwLock for HwSpinlock<R> {
    fn id(&self) -> LockId {
        self.id
    }

    fn try_lock(&self) -> bool {
        self.regs.read32(lock_offset(self.id.0)) != 0
    }

    fn unlock(&self) {
        self.regs.write32(lock_offset(self.id.0), 0);
    }
}

impl<R: RegisterIo> core::fmt::Debug for HwSpinlock<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HwSpinlock").field("id", &self.id).finish()
    }
}
