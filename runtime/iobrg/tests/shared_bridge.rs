//! Application core and companion microcontroller sharing the bridge

use std::sync::Arc;

use atlas_hwspinlock::{HwSpinlockBank, SimulatedArbiter};
use atlas_iobrg::*;

const COUNTER: u32 = 0x0100;
const FLAGS: u32 = 0x0104;

fn config() -> BridgeConfig {
    BridgeConfig {
        lock: 6,
        lock_timeout_us: 1_000_000,
        ..BridgeConfig::default()
    }
}

/// Read-modify-write sequences from both processors never interleave:
/// every increment lands and the lock is held on every register access.
#[test]
fn test_read_modify_write_from_two_processors() {
    let arbiter = Arc::new(SimulatedArbiter::new());
    let domain = Arc::new(SimulatedRtcDomain::new().checking_lock(Arc::clone(&arbiter), 6));

    let arm_bank = HwSpinlockBank::new(Arc::clone(&arbiter));
    let mcu_bank = HwSpinlockBank::new(Arc::clone(&arbiter));
    let arm = IoBridge::with_bank(Arc::clone(&domain), &arm_bank, config()).unwrap();
    let mcu = IoBridge::with_bank(Arc::clone(&domain), &mcu_bank, config()).unwrap();

    const ROUNDS: u32 = 2_000;
    crossbeam::scope(|s| {
        for (bridge, bit) in [(&arm, 0x1u32), (&mcu, 0x2u32)] {
            s.spawn(move |_| {
                for _ in 0..ROUNDS {
                    bridge
                        .transaction(|access| {
                            let count = access.read(COUNTER)?;
                            access.write(COUNTER, count + 1)
                        })
                        .unwrap();
                    bridge.update_bits(FLAGS, bit, bit).unwrap();
                }
            });
        }
    })
    .unwrap();

    assert_eq!(domain.peek(COUNTER), 2 * ROUNDS);
    assert_eq!(domain.peek(FLAGS), 0x3);
    assert_eq!(domain.unlocked_accesses(), 0);
}

#[test]
fn test_hardware_event_visible_through_bridge() {
    let domain = SimulatedRtcDomain::new();
    let bridge = IoBridge::unlocked(&domain, BridgeConfig::default()).unwrap();

    domain.poke(0x0050, 0x8000_0001);
    assert_eq!(bridge.read(0x0050).unwrap(), 0x8000_0001);

    // Acknowledge the event bit, keep the rest
    bridge.update_bits(0x0050, 0x8000_0000, 0).unwrap();
    assert_eq!(domain.peek(0x0050), 0x0000_0001);
}
