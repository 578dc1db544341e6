//! Two "processors" contending for one arbiter lock

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atlas_hwspinlock::*;

/// A non-atomic read-modify-write protected only by the arbiter lock
/// never loses an update.
#[test]
fn test_mutual_exclusion_between_threads() {
    let bank = HwSpinlockBank::new(SimulatedArbiter::new());
    let lock = Arc::new(bank.request(4).unwrap());
    let counter = Arc::new(AtomicU32::new(0));

    crossbeam::scope(|s| {
        for _ in 0..2 {
            let lock = Arc::clone(&lock);
            let counter = Arc::clone(&counter);
            s.spawn(move |_| {
                for _ in 0..5_000 {
                    let _guard = lock.lock_timeout(Duration::from_secs(5)).unwrap();
                    let v = counter.load(Ordering::Relaxed);
                    std::hint::spin_loop();
                    counter.store(v + 1, Ordering::Relaxed);
                }
            });
        }
    })
    .unwrap();

    assert_eq!(counter.load(Ordering::Relaxed), 10_000);
}

/// A peer that holds the lock past the timeout yields a distinct error,
/// and the waiting side recovers once the peer lets go.
#[test]
fn test_timeout_then_recovery() {
    let arbiter = Arc::new(SimulatedArbiter::new());
    let bank = HwSpinlockBank::new(Arc::clone(&arbiter));
    let lock = bank.request(9).unwrap();

    assert!(arbiter.hold(9));
    let err = lock.lock_timeout(Duration::from_millis(3)).unwrap_err();
    assert!(matches!(err, HwLockError::Timeout { id: LockId(9), .. }));
    assert!(err.to_string().contains("#9"));

    let peer = Arc::clone(&arbiter);
    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(5));
        peer.release(9);
    });

    let guard = lock.lock_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(guard.id(), LockId(9));
    drop(guard);
    releaser.join().unwrap();
    assert!(!arbiter.is_locked(9));
}
