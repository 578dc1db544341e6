//! Remote processor IPC context
//!
//! Built once when the co-processor subsystem starts and torn down only
//! with it. Holds both FIFO directions, their hardware locks and the
//! doorbell towards the co-processor; there is no global state.

use std::sync::Arc;

use atlas_hwspinlock::{HwLock, HwSpinlock, HwSpinlockBank, RegisterIo};

use crate::config::RprocConfig;
use crate::doorbell::Doorbell;
use crate::fifo::{FifoStats, ShmemFifo};
use crate::shmem::SharedMemory;
use crate::vq::{VqDispatcher, VqKicker};
use crate::{IpcError, Result};

/// Application-core side of the co-processor link
pub struct RprocIpc<M: SharedMemory, R: RegisterIo, D: Doorbell> {
    kicker: VqKicker<M, HwSpinlock<R>, D>,
    dispatcher: VqDispatcher<M, HwSpinlock<R>>,
    config: RprocConfig,
}

impl<M: SharedMemory, R: RegisterIo, D: Doorbell> RprocIpc<M, R, D> {
    /// Claim both locks, lay out both FIFOs and zero their counts
    ///
    /// On failure everything claimed so far is returned to `bank`.
    pub fn init(
        config: RprocConfig,
        bank: &HwSpinlockBank<R>,
        tx_mem: M,
        rx_mem: M,
        doorbell: D,
    ) -> core::result::Result<Self, IpcError> {
        config.validate()?;
        config.tx.check_region(tx_mem.len())?;
        config.rx.check_region(rx_mem.len())?;

        let tx_lock = bank.request(config.tx_lock)?;
        let rx_lock = match bank.request(config.rx_lock) {
            Ok(lock) => lock,
            Err(err) => {
                bank.free(tx_lock)?;
                return Err(err.into());
            }
        };

        let tx = ShmemFifo::new(tx_mem, tx_lock, &config.tx)?;
        let rx = ShmemFifo::new(rx_mem, rx_lock, &config.rx)?;

        if let Err(err) = tx.init().and_then(|()| rx.init()) {
            log::error!("rproc ipc: init failed: {}", err);
            release(bank, rx);
            release(bank, tx);
            return Err(err.into());
        }

        let kicker = VqKicker::new(tx.writer(doorbell)?, config.kick_retries);
        let dispatcher = VqDispatcher::new(rx.reader()?);

        log::info!(
            "rproc ipc: tx {} bytes (lock {}), rx {} bytes (lock {})",
            config.tx.capacity,
            config.tx_lock,
            config.rx.capacity,
            config.rx_lock
        );

        Ok(Self {
            kicker,
            dispatcher,
            config,
        })
    }

    /// Notify the co-processor about virtqueue `vq`
    pub fn kick(&mut self, vq: u32) -> Result<()> {
        self.kicker.kick(vq)
    }

    /// Dispatch every virtqueue index the co-processor has posted
    pub fn poll<F: FnMut(u32)>(&mut self, handler: F) -> Result<usize> {
        self.dispatcher.drain(handler)
    }

    /// Hard reset of both directions after a fatal error
    ///
    /// The co-processor must be restarted (or reset its own cursors) too.
    pub fn recover(&mut self) -> Result<()> {
        log::warn!("rproc ipc: resetting both channels");
        self.kicker.writer_mut().reset()?;
        self.dispatcher.reader_mut().reset()?;
        self.dispatcher.discard_pending();
        Ok(())
    }

    pub fn tx_stats(&self) -> FifoStats {
        self.kicker.writer().fifo().stats()
    }

    pub fn rx_stats(&self) -> FifoStats {
        self.dispatcher.reader().fifo().stats()
    }

    pub fn config(&self) -> &RprocConfig {
        &self.config
    }

    /// Subsystem shutdown: reset both FIFOs and return the locks
    pub fn teardown(self, bank: &HwSpinlockBank<R>) -> core::result::Result<(), IpcError> {
        let Self {
            kicker, dispatcher, ..
        } = self;

        let mut writer = kicker.into_writer();
        let mut reader = dispatcher.into_reader();
        let outcome: Result<()> = writer.reset().and_then(|()| reader.reset());

        let tx = Arc::clone(writer.fifo());
        let rx = Arc::clone(reader.fifo());
        drop(writer);
        drop(reader);
        release(bank, rx);
        release(bank, tx);

        log::info!("rproc ipc: torn down");
        outcome.map_err(IpcError::from)
    }
}

fn release<M: SharedMemory, R: RegisterIo>(
    bank: &HwSpinlockBank<R>,
    fifo: Arc<ShmemFifo<M, HwSpinlock<R>>>,
) {
    match fifo.into_lock() {
        Ok(lock) => {
            if let Err(err) = bank.free(lock) {
                log::warn!("rproc ipc: {}", err);
            }
        }
        Err(fifo) => log::warn!("fifo {}: still referenced, lock kept", fifo.lock().id()),
    }
}
