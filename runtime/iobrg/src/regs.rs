//! Bridge register window
//!
//! The RTC/power domain is not memory mapped. Its registers are reached
//! through four bridge registers: load the target address (and data for a
//! write), set `CTRL.START`, wait for the bridge to clear it.

use bitflags::bitflags;

/// Control: start / busy
pub const CTRL: usize = 0x00;
/// Write byte enables (zero for a read)
pub const WRBE: usize = 0x04;
/// Target register address in the RTC domain
pub const ADDR: usize = 0x08;
/// Write data / read result
pub const DATA: usize = 0x0c;

/// Size of the bridge window
pub const WINDOW_SIZE: usize = 0x10;

bitflags! {
    /// `CTRL` register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Ctrl: u32 {
        /// Set by software to start a transfer; reads back set while busy
        const START = 1 << 0;
    }
}

bitflags! {
    /// `WRBE` byte lanes
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ByteEnable: u32 {
        const B0 = 1 << 0;
        const B1 = 1 << 1;
        const B2 = 1 << 2;
        const B3 = 1 << 3;
    }
}

impl ByteEnable {
    /// Mask of the data bits the enabled lanes cover
    pub fn data_mask(self) -> u32 {
        (0..4)
            .filter(|lane| self.bits() & (1 << lane) != 0)
            .fold(0, |mask, lane| mask | (0xff << (lane * 8)))
    }
}
