//! Simulated arbiter
//!
//! Host stand-in for the hardware lock bank. A register read is an atomic
//! test-and-set, a write of zero clears, exactly as the silicon behaves, so
//! the same [`crate::HwSpinlock`] code runs against it. The `hold` /
//! `release` helpers let a test thread play the co-processor.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::bank::{DEFAULT_NUM_LOCKS, LOCK_BASE, LOCK_STRIDE};
use crate::RegisterIo;

pub struct SimulatedArbiter {
    locks: Vec<AtomicU32>,
}

impl SimulatedArbiter {
    pub fn new() -> Self {
        Self::with_locks(DEFAULT_NUM_LOCKS)
    }

    pub fn with_locks(num_locks: u32) -> Self {
        Self {
            locks: (0..num_locks).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    fn slot(&self, offset: usize) -> Option<&AtomicU32> {
        if offset < LOCK_BASE || (offset - LOCK_BASE) % LOCK_STRIDE != 0 {
            return None;
        }
        self.locks.get((offset - LOCK_BASE) / LOCK_STRIDE)
    }

    /// Take lock `id` on behalf of the peer processor
    pub fn hold(&self, id: u32) -> bool {
        self.locks[id as usize]
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Drop the peer's hold on lock `id`
    pub fn release(&self, id: u32) {
        self.locks[id as usize].store(0, Ordering::Release);
    }

    /// Whether anybody holds lock `id`
    pub fn is_locked(&self, id: u32) -> bool {
        self.locks[id as usize].load(Ordering::Acquire) != 0
    }
}

impl Default for SimulatedArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterIo for SimulatedArbiter {
    fn read32(&self, offset: usize) -> u32 {
        match self.slot(offset) {
            // Value 0 means free: the read takes it and reports success.
            Some(lock) => u32::from(lock.swap(1, Ordering::AcqRel) == 0),
            None => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        if let Some(lock) = self.slot(offset) {
            if value == 0 {
                lock.store(0, Ordering::Release);
            }
        } else {
            log::trace!("sim arbiter: ignored write {:#x} to {:#x}", value, offset);
        }
    }
}
