//! RTC I/O Bridge - Locked access to the always-on register domain
//!
//! # Purpose
//! The RTC, power controller and on-key registers live in an always-on
//! domain reached only through an indirect bridge, and the companion
//! microcontroller drives the same bridge. Every access from this side
//! funnels through [`IoBridge`], which holds the shared hardware spinlock
//! for the whole register sequence.
//!
//! # Integration Points
//! - Depends on: `atlas-hwspinlock` (lock shared with the microcontroller),
//!   the bridge register window
//! - Provides to: RTC, power-controller and on-key code
//!
//! # Invariants
//! - The lock is taken before and released after a complete
//!   read-modify-write, never per individual register access
//! - A lock timeout is fatal under the default [`TimeoutPolicy::Panic`]
//!
//! # Testing Strategy
//! - Unit tests: handshake sequencing, byte enables, stuck transfers
//! - Integration tests: two processors doing read-modify-write through
//!   [`SimulatedRtcDomain`] under one arbiter lock

use std::sync::atomic::{AtomicBool, Ordering};

use atlas_hwspinlock::{HwLock, HwLockError, HwLockGuard, HwSpinlock, HwSpinlockBank, LockId, RegisterIo};
use thiserror::Error;

pub mod config;
pub mod regs;
mod sim;

pub use config::{BridgeConfig, TimeoutPolicy};
pub use regs::{ByteEnable, Ctrl};
pub use sim::SimulatedRtcDomain;

/// Bridge errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("rtc iobrg lock: {0}")]
    Lock(#[from] HwLockError),

    #[error("rtc iobrg transfer to {addr:#x} still busy after {polls} polls")]
    Stuck { addr: u32, polls: u32 },

    #[error("rtc iobrg config: {0}")]
    Config(String),
}

pub type Result<T> = core::result::Result<T, BridgeError>;

/// Process-local spin flag for parts without a companion bus master
///
/// Not a blocking mutex: [`HwLock::lock_timeout`] spins on it with the same
/// bounded timeout as an arbiter lock, so both bridges share one contract.
#[derive(Debug, Default)]
pub struct LocalLock {
    held: AtomicBool,
}

impl HwLock for LocalLock {
    fn id(&self) -> LockId {
        LockId(u32::MAX)
    }

    fn try_lock(&self) -> bool {
        !self.held.swap(true, Ordering::Acquire)
    }

    fn unlock(&self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Locked bridge to the RTC domain
pub struct IoBridge<R: RegisterIo, L: HwLock> {
    regs: R,
    lock: L,
    config: BridgeConfig,
}

impl<R: RegisterIo, L: HwLock> IoBridge<R, L> {
    /// Bridge over `regs`, serialized by `lock`
    pub fn new(regs: R, lock: L, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        log::debug!(
            "rtc iobrg: lock {}, timeout {:?}, policy {:?}",
            lock.id(),
            config.lock_timeout(),
            config.timeout_policy
        );
        Ok(Self { regs, lock, config })
    }

    /// Read RTC-domain register `addr`
    pub fn read(&self, addr: u32) -> Result<u32> {
        self.transaction(|access| access.read(addr))
    }

    /// Write RTC-domain register `addr`
    pub fn write(&self, addr: u32, value: u32) -> Result<()> {
        self.transaction(|access| access.write(addr, value))
    }

    /// Replace the `mask` bits of `addr` with `value`, returning the new
    /// register value; one lock hold covers the read and the write
    pub fn update_bits(&self, addr: u32, mask: u32, value: u32) -> Result<u32> {
        self.transaction(|access| access.update_bits(addr, mask, value))
    }

    /// Run a register sequence under a single lock hold
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut BridgeAccess<'_, R>) -> Result<T>,
    {
        let _guard = self.acquire()?;
        let mut access = BridgeAccess {
            regs: &self.regs,
            poll_limit: self.config.poll_limit,
        };
        f(&mut access)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn into_parts(self) -> (R, L) {
        (self.regs, self.lock)
    }

    fn acquire(&self) -> Result<HwLockGuard<'_, L>> {
        match self.lock.lock_timeout(self.config.lock_timeout()) {
            Ok(guard) => Ok(guard),
            Err(err) => match self.config.timeout_policy {
                TimeoutPolicy::Panic => {
                    log::error!("rtc iobrg: {}; companion processor wedged", err);
                    panic!("rtc iobrg: {err}");
                }
                TimeoutPolicy::Propagate => Err(err.into()),
            },
        }
    }
}

impl<R: RegisterIo> IoBridge<R, LocalLock> {
    /// Bridge for parts where no other processor drives it
    pub fn unlocked(regs: R, config: BridgeConfig) -> Result<Self> {
        Self::new(regs, LocalLock::default(), config)
    }
}

impl<R: RegisterIo, A: RegisterIo> IoBridge<R, HwSpinlock<A>> {
    /// Claim the configured lock from `bank` and build the bridge
    pub fn with_bank(regs: R, bank: &HwSpinlockBank<A>, config: BridgeConfig) -> Result<Self> {
        config.validate()?;
        let lock = bank.request(config.lock)?;
        Self::new(regs, lock, config)
    }
}

/// Raw bridge handshake, only reachable with the lock held
pub struct BridgeAccess<'a, R: RegisterIo> {
    regs: &'a R,
    poll_limit: u32,
}

impl<R: RegisterIo> BridgeAccess<'_, R> {
    pub fn read(&mut self, addr: u32) -> Result<u32> {
        self.wait_idle(addr)?;
        self.regs.write32(regs::WRBE, 0);
        self.regs.write32(regs::ADDR, addr);
        self.regs.write32(regs::CTRL, Ctrl::START.bits());
        self.wait_idle(addr)?;
        Ok(self.regs.read32(regs::DATA))
    }

    pub fn write(&mut self, addr: u32, value: u32) -> Result<()> {
        self.write_lanes(addr, value, ByteEnable::all())
    }

    /// Write only the enabled byte lanes of `value`
    pub fn write_lanes(&mut self, addr: u32, value: u32, lanes: ByteEnable) -> Result<()> {
        self.wait_idle(addr)?;
        self.regs.write32(regs::WRBE, lanes.bits());
        self.regs.write32(regs::ADDR, addr);
        self.regs.write32(regs::DATA, value);
        self.regs.write32(regs::CTRL, Ctrl::START.bits());
        self.wait_idle(addr)
    }

    pub fn update_bits(&mut self, addr: u32, mask: u32, value: u32) -> Result<u32> {
        let old = self.read(addr)?;
        let new = (old & !mask) | (value & mask);
        if new != old {
            self.write(addr, new)?;
        }
        Ok(new)
    }

    fn wait_idle(&self, addr: u32) -> Result<()> {
        for _ in 0..self.poll_limit {
            if !Ctrl::from_bits_truncate(self.regs.read32(regs::CTRL)).contains(Ctrl::START) {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        log::error!("rtc iobrg: transfer to {:#x} stuck", addr);
        Err(BridgeError::Stuck {
            addr,
            polls: self.poll_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlas_hwspinlock::SimulatedArbiter;
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> BridgeConfig {
        BridgeConfig {
            lock: 2,
            lock_timeout_us: 2_000,
            poll_limit: 32,
            timeout_policy: TimeoutPolicy::Propagate,
        }
    }

    #[test]
    fn test_read_write() {
        let bridge = IoBridge::unlocked(SimulatedRtcDomain::new(), config()).unwrap();
        bridge.write(0x2000, 0x1234_5678).unwrap();
        assert_eq!(bridge.read(0x2000).unwrap(), 0x1234_5678);
        assert_eq!(bridge.read(0x2004).unwrap(), 0);
    }

    #[test]
    fn test_update_bits() {
        let bridge = IoBridge::unlocked(SimulatedRtcDomain::new(), config()).unwrap();
        bridge.write(0x10, 0xff00).unwrap();
        assert_eq!(bridge.update_bits(0x10, 0x0f0f, 0x0505).unwrap(), 0xf505);
        assert_eq!(bridge.read(0x10).unwrap(), 0xf505);

        let (domain, _) = bridge.into_parts();
        let writes = domain.writes();
        // Unchanged value is not written back
        let bridge = IoBridge::unlocked(domain, config()).unwrap();
        bridge.update_bits(0x10, 0x0f00, 0x0500).unwrap();
        assert_eq!(bridge.into_parts().0.writes(), writes);
    }

    #[test]
    fn test_write_lanes() {
        let bridge = IoBridge::unlocked(SimulatedRtcDomain::new(), config()).unwrap();
        bridge.write(0x40, 0xaabb_ccdd).unwrap();
        bridge
            .transaction(|access| access.write_lanes(0x40, 0x1122_3344, ByteEnable::B0 | ByteEnable::B3))
            .unwrap();
        assert_eq!(bridge.read(0x40).unwrap(), 0x11bb_cc44);
    }

    #[test]
    fn test_stuck_transfer() {
        let domain = SimulatedRtcDomain::new();
        domain.set_wedged(true);
        let bridge = IoBridge::unlocked(domain, config()).unwrap();

        assert_eq!(
            bridge.read(0x8).unwrap_err(),
            BridgeError::Stuck { addr: 0x8, polls: 32 }
        );
        // Lock released despite the failure
        let (domain, lock) = bridge.into_parts();
        assert!(lock.try_lock());
        domain.set_wedged(false);
    }

    #[test]
    fn test_invalid_config_keeps_lock_in_bank() {
        let bank = HwSpinlockBank::new(SimulatedArbiter::new());
        let bad = BridgeConfig {
            lock: 4,
            poll_limit: 0,
            ..config()
        };
        assert!(matches!(
            IoBridge::with_bank(SimulatedRtcDomain::new(), &bank, bad),
            Err(BridgeError::Config(_))
        ));
        assert!(!bank.is_requested(4));

        let good = BridgeConfig { lock: 4, ..config() };
        let bridge = IoBridge::with_bank(SimulatedRtcDomain::new(), &bank, good).unwrap();
        assert!(bank.is_requested(4));
        bridge.write(0x0, 7).unwrap();
    }

    #[test]
    fn test_local_flag_excludes_second_holder() {
        let lock = LocalLock::default();
        assert_eq!(lock.id(), LockId(u32::MAX));

        let guard = lock.lock_timeout(Duration::from_millis(1)).unwrap();
        assert!(!lock.try_lock());
        assert!(matches!(
            lock.lock_timeout(Duration::from_millis(1)),
            Err(HwLockError::Timeout { .. })
        ));

        drop(guard);
        assert!(lock.try_lock());
        lock.unlock();
    }

    #[test]
    fn test_timeout_propagates() {
        let arbiter = Arc::new(SimulatedArbiter::new());
        let bank = HwSpinlockBank::new(Arc::clone(&arbiter));
        let bridge = IoBridge::with_bank(SimulatedRtcDomain::new(), &bank, config()).unwrap();

        assert!(arbiter.hold(2));
        let err = bridge.write(0x0, 1).unwrap_err();
        assert!(matches!(err, BridgeError::Lock(HwLockError::Timeout { .. })));
        arbiter.release(2);
        bridge.write(0x0, 1).unwrap();
    }

    #[test]
    #[should_panic(expected = "rtc iobrg")]
    fn test_timeout_panics_by_default() {
        let arbiter = Arc::new(SimulatedArbiter::new());
        let bank = HwSpinlockBank::new(Arc::clone(&arbiter));
        let config = BridgeConfig {
            timeout_policy: TimeoutPolicy::Panic,
            ..config()
        };
        let bridge = IoBridge::with_bank(SimulatedRtcDomain::new(), &bank, config).unwrap();

        assert!(arbiter.hold(2));
        let _ = bridge.read(0x0);
    }

    #[test]
    fn test_lock_held_for_whole_sequence() {
        let arbiter = Arc::new(SimulatedArbiter::new());
        let bank = HwSpinlockBank::new(Arc::clone(&arbiter));
        let domain = SimulatedRtcDomain::new().checking_lock(Arc::clone(&arbiter), 2);
        let bridge = IoBridge::with_bank(domain, &bank, config()).unwrap();

        bridge.update_bits(0x20, 0x3, 0x1).unwrap();
        bridge
            .transaction(|access| {
                let v = access.read(0x24)?;
                std::thread::sleep(Duration::from_millis(1));
                access.write(0x24, v + 1)
            })
            .unwrap();

        let (domain, _) = bridge.into_parts();
        assert!(domain.accesses() > 0);
        assert_eq!(domain.unlocked_accesses(), 0);

        // Touching the window without the bridge is flagged
        domain.write32(regs::ADDR, 0);
        assert_eq!(domain.unlocked_accesses(), 1);
    }
}
