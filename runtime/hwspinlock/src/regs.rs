//! Register access seam
//!
//! Everything that touches a hardware register block goes through
//! [`RegisterIo`]. On target the block is a mapped MMIO window
//! ([`MmioRegisters`]); on the host it is one of the simulators.

use core::ptr;

/// 32-bit register block access
///
/// Offsets are byte offsets from the start of the block and must be
/// 4-byte aligned.
pub trait RegisterIo: Send + Sync {
    /// Read the register at `offset`
    fn read32(&self, offset: usize) -> u32;

    /// Write `value` to the register at `offset`
    fn write32(&self, offset: usize, value: u32);
}

impl<R: RegisterIo + ?Sized> RegisterIo for &R {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

impl<R: RegisterIo + ?Sized> RegisterIo for std::sync::Arc<R> {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value)
    }
}

/// Memory-mapped register window
///
/// Every access is a single volatile 32-bit load or store.
pub struct MmioRegisters {
    base: *mut u8,
    len: usize,
}

// SAFETY: the window is device memory; the hardware serializes individual
// 32-bit accesses and the pointer itself is never reallocated.
unsafe impl Send for MmioRegisters {}
unsafe impl Sync for MmioRegisters {}

impl MmioRegisters {
    /// Wrap a mapped register window
    ///
    /// # Safety
    /// `base` must point to a mapping of at least `len` bytes that stays
    /// valid (and uncached) for the lifetime of the returned value.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    /// Size of the window in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the window is empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: usize) {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "register offset {:#x} outside {:#x}-byte window",
            offset,
            self.len
        );
    }
}

impl RegisterIo for MmioRegisters {
    fn read32(&self, offset: usize) -> u32 {
        self.check(offset);
        // SAFETY: bounds and alignment checked above, mapping valid per `new`.
        unsafe { ptr::read_volatile(self.base.add(offset) as *const u32) }
    }

    fn write32(&self, offset: usize, value: u32) {
        self.check(offset);
        // SAFETY: bounds and alignment checked above, mapping valid per `new`.
        unsafe { ptr::write_volatile(self.base.add(offset) as *mut u32, value) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mmio_window_round_trip() {
        let mut backing = [0u32; 8];
        let regs = unsafe { MmioRegisters::new(backing.as_mut_ptr() as *mut u8, 32) };

        regs.write32(0x0c, 0xdead_beef);
        assert_eq!(regs.read32(0x0c), 0xdead_beef);
        assert_eq!(regs.read32(0x10), 0);
        assert_eq!(regs.len(), 32);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_mmio_out_of_window() {
        let mut backing = [0u32; 2];
        let regs = unsafe { MmioRegisters::new(backing.as_mut_ptr() as *mut u8, 8) };
        regs.read32(8);
    }
}
