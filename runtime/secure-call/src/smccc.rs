//! SMC calling convention: function identifiers and register images

use bitflags::bitflags;

bitflags! {
    /// Call-type bits of a function identifier
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CallFlags: u32 {
        /// Fast (atomic) call rather than yielding
        const FAST = 1 << 31;
        /// 64-bit register convention
        const SMC64 = 1 << 30;
    }
}

const OWNER_SHIFT: u32 = 24;
const OWNER_MASK: u32 = 0x3f;
const NUMBER_MASK: u32 = 0xffff;

/// Owning entity of a call
pub const OWNER_SIP: u32 = 2;
pub const OWNER_OEM: u32 = 3;
pub const OWNER_TRUSTED_OS: u32 = 50;

/// Compose a function identifier
pub const fn function_id(flags: CallFlags, owner: u32, number: u32) -> u32 {
    flags.bits() | ((owner & OWNER_MASK) << OWNER_SHIFT) | (number & NUMBER_MASK)
}

/// Returned in `x0` for an unknown function identifier
pub const NOT_SUPPORTED: i64 = -1;

/// Arguments of one secure monitor call (`w0`, `x1`-`x4`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmcArgs {
    pub function_id: u32,
    pub args: [u64; 4],
}

impl SmcArgs {
    pub fn new(function_id: u32, args: [u64; 4]) -> Self {
        Self { function_id, args }
    }

    pub fn flags(&self) -> CallFlags {
        CallFlags::from_bits_truncate(self.function_id)
    }

    pub fn owner(&self) -> u32 {
        (self.function_id >> OWNER_SHIFT) & OWNER_MASK
    }

    pub fn number(&self) -> u32 {
        self.function_id & NUMBER_MASK
    }
}

/// Result registers `x0`-`x3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SmcResult(pub [u64; 4]);

impl SmcResult {
    /// `x0` as a signed status
    pub fn status(&self) -> i64 {
        self.0[0] as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_function_id_fields() {
        let id = function_id(CallFlags::FAST | CallFlags::SMC64, OWNER_SIP, 0x12);
        assert_eq!(id, 0xc200_0012);

        let args = SmcArgs::new(id, [0; 4]);
        assert_eq!(args.flags(), CallFlags::FAST | CallFlags::SMC64);
        assert_eq!(args.owner(), OWNER_SIP);
        assert_eq!(args.number(), 0x12);
    }

    #[test]
    fn test_status_sign() {
        assert_eq!(SmcResult([u64::MAX, 0, 0, 0]).status(), NOT_SUPPORTED);
        assert_eq!(SmcResult::default().status(), 0);
    }
}
