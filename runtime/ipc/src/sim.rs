//! Host-side co-processor simulation
//!
//! Plays the far end of an [`RprocIpc`] link: its own lock bank over the
//! same [`SimulatedArbiter`], the TX FIFO's reader and the RX FIFO's
//! writer. Used by the integration tests and the `atlas-ipc-sim` tool.

use std::collections::VecDeque;
use std::sync::Arc;

use atlas_hwspinlock::{HwSpinlock, HwSpinlockBank, SimulatedArbiter};

use crate::config::RprocConfig;
use crate::context::RprocIpc;
use crate::doorbell::Doorbell;
use crate::fifo::{FifoStats, ShmemFifo};
use crate::shmem::HeapRegion;
use crate::vq::{VqDispatcher, VqKicker};
use crate::{FifoError, IpcError, Result};

/// Arbiter lock as seen through a simulated bank
pub type SimLock = HwSpinlock<Arc<SimulatedArbiter>>;

/// Co-processor end of the link
pub struct SimulatedCoprocessor<D: Doorbell> {
    inbox: VqDispatcher<HeapRegion, SimLock>,
    outbox: VqKicker<HeapRegion, SimLock, D>,
    backlog: VecDeque<u32>,
}

impl<D: Doorbell> SimulatedCoprocessor<D> {
    /// Attach to FIFOs the application core has already initialized
    ///
    /// `doorbell` rings the application core.
    pub fn attach(
        config: &RprocConfig,
        arbiter: Arc<SimulatedArbiter>,
        tx_mem: HeapRegion,
        rx_mem: HeapRegion,
        doorbell: D,
    ) -> core::result::Result<Self, IpcError> {
        let bank = HwSpinlockBank::new(arbiter);
        let inbox = ShmemFifo::new(tx_mem, bank.request(config.tx_lock)?, &config.tx)?;
        let outbox = ShmemFifo::new(rx_mem, bank.request(config.rx_lock)?, &config.rx)?;

        Ok(Self {
            inbox: VqDispatcher::new(inbox.reader()?),
            outbox: VqKicker::new(outbox.writer(doorbell)?, config.kick_retries),
            backlog: VecDeque::new(),
        })
    }

    /// Consume kicks from the application core
    pub fn receive<F: FnMut(u32)>(&mut self, handler: F) -> Result<usize> {
        self.inbox.drain(handler)
    }

    /// Kick virtqueue `vq` towards the application core
    pub fn kick(&mut self, vq: u32) -> Result<()> {
        self.outbox.kick(vq)
    }

    /// Acknowledge pending kicks by kicking the same index back
    ///
    /// Returns how many were sent back. Indices that do not fit while the
    /// application core is behind stay queued for the next call.
    pub fn echo(&mut self) -> Result<usize> {
        let backlog = &mut self.backlog;
        self.inbox.drain(|vq| backlog.push_back(vq))?;

        let mut echoed = 0;
        while let Some(&vq) = self.backlog.front() {
            match self.outbox.kick(vq) {
                Ok(()) => {
                    self.backlog.pop_front();
                    echoed += 1;
                }
                Err(FifoError::Busy { .. }) => break,
                Err(err) => return Err(err),
            }
        }
        Ok(echoed)
    }

    /// Kicks received but not yet echoed
    pub fn backlog(&self) -> usize {
        self.backlog.len()
    }

    /// Rewind after the application core reset the link
    pub fn rewind(&mut self) {
        self.backlog.clear();
        self.inbox.reader_mut().rewind();
        self.inbox.discard_pending();
        self.outbox.writer_mut().rewind();
    }

    pub fn inbox_stats(&self) -> FifoStats {
        self.inbox.reader().fifo().stats()
    }

    pub fn outbox_stats(&self) -> FifoStats {
        self.outbox.writer().fifo().stats()
    }
}

/// Both ends of a simulated link sharing one arbiter
pub struct SimulatedLink<H: Doorbell, P: Doorbell> {
    pub arbiter: Arc<SimulatedArbiter>,
    pub bank: HwSpinlockBank<Arc<SimulatedArbiter>>,
    pub host: RprocIpc<HeapRegion, Arc<SimulatedArbiter>, P>,
    pub peer: SimulatedCoprocessor<H>,
}

impl<H: Doorbell, P: Doorbell> SimulatedLink<H, P> {
    /// Build a link
    ///
    /// `to_peer` is rung by the application core, `to_host` by the
    /// co-processor.
    pub fn new(config: RprocConfig, to_peer: P, to_host: H) -> core::result::Result<Self, IpcError> {
        let arbiter = Arc::new(SimulatedArbiter::new());
        let bank = HwSpinlockBank::new(Arc::clone(&arbiter));
        let tx_mem = HeapRegion::new(config.tx.region_size());
        let rx_mem = HeapRegion::new(config.rx.region_size());

        let peer_config = config.clone();
        let host = RprocIpc::init(config, &bank, tx_mem.clone(), rx_mem.clone(), to_peer)?;
        let peer = SimulatedCoprocessor::attach(
            &peer_config,
            Arc::clone(&arbiter),
            tx_mem,
            rx_mem,
            to_host,
        )?;

        Ok(Self {
            arbiter,
            bank,
            host,
            peer,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doorbell::CountingDoorbell;

    #[test]
    fn test_round_trip_kicks() {
        let to_peer = Arc::new(CountingDoorbell::new());
        let to_host = Arc::new(CountingDoorbell::new());
        let mut link =
            SimulatedLink::new(RprocConfig::default(), Arc::clone(&to_peer), Arc::clone(&to_host))
                .unwrap();

        link.host.kick(0).unwrap();
        link.host.kick(1).unwrap();
        assert_eq!(to_peer.count(), 2);

        assert_eq!(link.peer.echo().unwrap(), 2);
        assert_eq!(to_host.count(), 2);

        let mut seen = Vec::new();
        assert_eq!(link.host.poll(|vq| seen.push(vq)).unwrap(), 2);
        assert_eq!(seen, vec![0, 1]);
        assert_eq!(link.host.tx_stats().bytes_written, 8);
        assert_eq!(link.peer.inbox_stats().bytes_read, 8);
    }
}
