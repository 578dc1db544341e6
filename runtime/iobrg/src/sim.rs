//! Simulated always-on domain behind the bridge
//!
//! Completes every transfer as soon as `CTRL.START` is written, unless
//! wedged, in which case `CTRL` stays busy forever. Optionally checks that
//! an arbiter lock is held on every bridge register access.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use atlas_hwspinlock::{RegisterIo, SimulatedArbiter};

use crate::regs::{self, ByteEnable, Ctrl};

#[derive(Default)]
struct State {
    ctrl: u32,
    wrbe: u32,
    addr: u32,
    data: u32,
    wedged: bool,
    registers: BTreeMap<u32, u32>,
}

pub struct SimulatedRtcDomain {
    state: Mutex<State>,
    lock_check: Option<(Arc<SimulatedArbiter>, u32)>,
    accesses: AtomicU64,
    unlocked_accesses: AtomicU64,
    writes: AtomicU64,
}

impl SimulatedRtcDomain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            lock_check: None,
            accesses: AtomicU64::new(0),
            unlocked_accesses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Flag bridge accesses made while arbiter lock `id` is free
    pub fn checking_lock(mut self, arbiter: Arc<SimulatedArbiter>, id: u32) -> Self {
        self.lock_check = Some((arbiter, id));
        self
    }

    /// Make transfers never complete
    pub fn set_wedged(&self, wedged: bool) {
        let mut state = self.state();
        state.wedged = wedged;
        if !wedged {
            state.ctrl = 0;
        }
    }

    /// Register value as the always-on domain sees it
    pub fn peek(&self, addr: u32) -> u32 {
        self.state().registers.get(&addr).copied().unwrap_or(0)
    }

    /// Set a register behind the bridge's back (hardware event)
    pub fn poke(&self, addr: u32, value: u32) {
        self.state().registers.insert(addr, value);
    }

    /// Bridge register accesses so far
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Accesses made without the checked lock held
    pub fn unlocked_accesses(&self) -> u64 {
        self.unlocked_accesses.load(Ordering::Relaxed)
    }

    /// Completed write transfers
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record_access(&self) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        if let Some((arbiter, id)) = &self.lock_check {
            if !arbiter.is_locked(*id) {
                self.unlocked_accesses.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn run_transfer(&self, state: &mut State) {
        if state.wedged {
            state.ctrl = Ctrl::START.bits();
            return;
        }

        let lanes = ByteEnable::from_bits_truncate(state.wrbe);
        if lanes.is_empty() {
            state.data = state.registers.get(&state.addr).copied().unwrap_or(0);
        } else {
            let mask = lanes.data_mask();
            let old = state.registers.get(&state.addr).copied().unwrap_or(0);
            state
                .registers
                .insert(state.addr, (old & !mask) | (state.data & mask));
            self.writes.fetch_add(1, Ordering::Relaxed);
        }
        state.ctrl = 0;
    }
}

impl Default for SimulatedRtcDomain {
    fn default() -> Self {
        Self::new()
    }
}

impl RegisterIo for SimulatedRtcDomain {
    fn read32(&self, offset: usize) -> u32 {
        self.record_access();
        let state = self.state();
        match offset {
            regs::CTRL => state.ctrl,
            regs::WRBE => state.wrbe,
            regs::ADDR => state.addr,
            regs::DATA => state.data,
            _ => 0,
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        self.record_access();
        let mut state = self.state();
        match offset {
            regs::CTRL => {
                if Ctrl::from_bits_truncate(value).contains(Ctrl::START) {
                    self.run_transfer(&mut state);
                }
            }
            regs::WRBE => state.wrbe = value,
            regs::ADDR => state.addr = value,
            regs::DATA => state.data = value,
            _ => log::trace!("sim rtc: write {:#x} to unknown offset {:#x}", value, offset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_handshake() {
        let domain = SimulatedRtcDomain::new();
        domain.poke(0x30, 77);

        domain.write32(regs::WRBE, 0);
        domain.write32(regs::ADDR, 0x30);
        domain.write32(regs::CTRL, Ctrl::START.bits());
        assert_eq!(domain.read32(regs::CTRL), 0);
        assert_eq!(domain.read32(regs::DATA), 77);

        domain.write32(regs::WRBE, ByteEnable::all().bits());
        domain.write32(regs::DATA, 5);
        domain.write32(regs::CTRL, Ctrl::START.bits());
        assert_eq!(domain.peek(0x30), 5);
        assert_eq!(domain.writes(), 1);
    }

    #[test]
    fn test_wedged_stays_busy() {
        let domain = SimulatedRtcDomain::new();
        domain.set_wedged(true);
        domain.write32(regs::CTRL, Ctrl::START.bits());
        assert_eq!(domain.read32(regs::CTRL), Ctrl::START.bits());
        domain.set_wedged(false);
        assert_eq!(domain.read32(regs::CTRL), 0);
    }
}
