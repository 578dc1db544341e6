//! Doorbells - out-of-band "new data" signal to the peer
//!
//! The FIFO itself carries no notification. After a successful write the
//! writer issues a full barrier and rings the doorbell: on silicon a write
//! to the inter-processor interrupt register, on the host a coalescing
//! event channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atlas_hwspinlock::RegisterIo;
use crossbeam::channel::{self, Receiver, Sender, TryRecvError, TrySendError};

/// Signal the peer that the FIFO has new data
pub trait Doorbell: Send + Sync {
    fn ring(&self);
}

impl<D: Doorbell + ?Sized> Doorbell for Arc<D> {
    fn ring(&self) {
        (**self).ring()
    }
}

impl<D: Doorbell + ?Sized> Doorbell for &D {
    fn ring(&self) {
        (**self).ring()
    }
}

/// Doorbell for peers that poll
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDoorbell;

impl Doorbell for NoDoorbell {
    fn ring(&self) {}
}

/// Counts rings
#[derive(Debug, Default)]
pub struct CountingDoorbell {
    rings: AtomicU64,
}

impl CountingDoorbell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.rings.load(Ordering::Acquire)
    }
}

impl Doorbell for CountingDoorbell {
    fn ring(&self) {
        self.rings.fetch_add(1, Ordering::AcqRel);
    }
}

/// Inter-processor interrupt register
///
/// Ringing writes `value` to `offset` in the interrupt block.
pub struct RegisterDoorbell<R: RegisterIo> {
    regs: R,
    offset: usize,
    value: u32,
}

impl<R: RegisterIo> RegisterDoorbell<R> {
    pub fn new(regs: R, offset: usize, value: u32) -> Self {
        Self { regs, offset, value }
    }
}

impl<R: RegisterIo> Doorbell for RegisterDoorbell<R> {
    fn ring(&self) {
        self.regs.write32(self.offset, self.value);
    }
}

/// Host event doorbell; rings that arrive before the listener wakes
/// coalesce into one pending event
#[derive(Clone)]
pub struct EventDoorbell {
    tx: Sender<()>,
}

/// Receiving side of an [`EventDoorbell`]
pub struct DoorbellListener {
    rx: Receiver<()>,
}

impl EventDoorbell {
    /// Create a connected doorbell and listener
    pub fn pair() -> (EventDoorbell, DoorbellListener) {
        let (tx, rx) = channel::bounded(1);
        (EventDoorbell { tx }, DoorbellListener { rx })
    }
}

impl Doorbell for EventDoorbell {
    fn ring(&self) {
        match self.tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => {
                log::trace!("doorbell: listener gone");
            }
        }
    }
}

impl DoorbellListener {
    /// Wait up to `timeout` for a ring
    pub fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    /// Consume a pending ring, if any
    pub fn try_wait(&self) -> bool {
        match self.rx.try_recv() {
            Ok(()) => true,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => false,
        }
    }
}
