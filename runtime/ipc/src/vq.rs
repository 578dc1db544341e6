//! Virtqueue kick transport
//!
//! The remote processor link carries nothing but virtqueue indices: a kick
//! for vring `n` is the 32-bit little-endian word `n` written into the
//! FIFO, followed by the doorbell.

use atlas_hwspinlock::HwLock;

use crate::doorbell::Doorbell;
use crate::fifo::{FifoReader, FifoWriter};
use crate::shmem::SharedMemory;
use crate::{FifoError, Result};

const WORD: usize = core::mem::size_of::<u32>();

/// Sends virtqueue kicks
pub struct VqKicker<M: SharedMemory, L: HwLock, D: Doorbell> {
    writer: FifoWriter<M, L, D>,
    retries: u32,
}

impl<M: SharedMemory, L: HwLock, D: Doorbell> VqKicker<M, L, D> {
    pub fn new(writer: FifoWriter<M, L, D>, retries: u32) -> Self {
        Self { writer, retries }
    }

    /// Notify the peer that virtqueue `index` has work
    ///
    /// A full FIFO is retried up to the configured count, yielding in
    /// between; any other error is returned at once.
    pub fn kick(&mut self, index: u32) -> Result<()> {
        let word = index.to_le_bytes();
        let mut attempts = 0;

        loop {
            match self.writer.write(&word) {
                Err(FifoError::Busy { .. }) if attempts < self.retries => {
                    attempts += 1;
                    std::thread::yield_now();
                }
                Err(err) => {
                    log::warn!("vq kick {}: {}", index, err);
                    return Err(err);
                }
                Ok(()) => return Ok(()),
            }
        }
    }

    pub fn writer(&self) -> &FifoWriter<M, L, D> {
        &self.writer
    }

    pub fn writer_mut(&mut self) -> &mut FifoWriter<M, L, D> {
        &mut self.writer
    }

    pub fn into_writer(self) -> FifoWriter<M, L, D> {
        self.writer
    }
}

/// Receives virtqueue kicks
pub struct VqDispatcher<M: SharedMemory, L: HwLock> {
    reader: FifoReader<M, L>,
    pending: [u8; WORD],
    pending_len: usize,
}

impl<M: SharedMemory, L: HwLock> VqDispatcher<M, L> {
    pub fn new(reader: FifoReader<M, L>) -> Self {
        Self {
            reader,
            pending: [0; WORD],
            pending_len: 0,
        }
    }

    /// Read every complete index and hand it to `handler`
    ///
    /// Returns the number of indices dispatched. Bytes of an index the peer
    /// has not finished writing are held until the next call.
    pub fn drain<F: FnMut(u32)>(&mut self, mut handler: F) -> Result<usize> {
        let mut dispatched = 0;

        loop {
            match self.reader.read(&mut self.pending[self.pending_len..]) {
                Ok(n) => {
                    self.pending_len += n;
                    if self.pending_len == WORD {
                        handler(u32::from_le_bytes(self.pending));
                        self.pending_len = 0;
                        dispatched += 1;
                    }
                }
                Err(FifoError::Empty) => return Ok(dispatched),
                Err(err) => return Err(err),
            }
        }
    }

    /// Bytes of a partially received index
    pub fn pending(&self) -> usize {
        self.pending_len
    }

    /// Drop a partial index (channel reset)
    pub fn discard_pending(&mut self) {
        self.pending_len = 0;
    }

    pub fn reader(&self) -> &FifoReader<M, L> {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut FifoReader<M, L> {
        &mut self.reader
    }

    pub fn into_reader(self) -> FifoReader<M, L> {
        self.reader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FifoConfig;
    use crate::doorbell::NoDoorbell;
    use crate::fifo::ShmemFifo;
    use crate::shmem::HeapRegion;
    use atlas_hwspinlock::{HwSpinlockBank, SimulatedArbiter};

    fn link(capacity: usize, retries: u32) -> (
        VqKicker<HeapRegion, impl HwLock, NoDoorbell>,
        VqDispatcher<HeapRegion, impl HwLock>,
    ) {
        let bank = HwSpinlockBank::new(SimulatedArbiter::new());
        let config = FifoConfig {
            capacity,
            ..FifoConfig::default()
        };
        let fifo = ShmemFifo::new(
            HeapRegion::new(config.region_size()),
            bank.request(1).unwrap(),
            &config,
        )
        .unwrap();
        fifo.init().unwrap();
        (
            VqKicker::new(fifo.writer(NoDoorbell).unwrap(), retries),
            VqDispatcher::new(fifo.reader().unwrap()),
        )
    }

    #[test]
    fn test_kicks_arrive_in_order() {
        let (mut kicker, mut dispatcher) = link(16, 0);
        kicker.kick(0).unwrap();
        kicker.kick(3).unwrap();
        kicker.kick(0xdead_beef).unwrap();

        let mut seen = Vec::new();
        assert_eq!(dispatcher.drain(|vq| seen.push(vq)).unwrap(), 3);
        assert_eq!(seen, vec![0, 3, 0xdead_beef]);
        assert_eq!(dispatcher.drain(|_| unreachable!()).unwrap(), 0);
    }

    #[test]
    fn test_kick_busy_after_retries() {
        let (mut kicker, _dispatcher) = link(8, 3);
        kicker.kick(1).unwrap();
        kicker.kick(2).unwrap();
        assert_eq!(kicker.kick(3).unwrap_err(), FifoError::Busy { len: 4, free: 0 });
        assert_eq!(kicker.writer().fifo().stats().busy, 4);
    }

    #[test]
    fn test_kick_wraps_around() {
        let (mut kicker, mut dispatcher) = link(10, 0);
        let mut seen = Vec::new();
        for vq in 0..20 {
            kicker.kick(vq).unwrap();
            kicker.kick(vq + 100).unwrap();
            dispatcher.drain(|i| seen.push(i)).unwrap();
        }
        let expected: Vec<u32> = (0..20).flat_map(|vq| [vq, vq + 100]).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_partial_word_held() {
        let (mut kicker, mut dispatcher) = link(16, 0);
        let word = 0x0102_0304u32.to_le_bytes();

        kicker.writer_mut().write(&word[..3]).unwrap();
        assert_eq!(dispatcher.drain(|_| unreachable!()).unwrap(), 0);
        assert_eq!(dispatcher.pending(), 3);

        kicker.writer_mut().write(&word[3..]).unwrap();
        let mut seen = Vec::new();
        assert_eq!(dispatcher.drain(|vq| seen.push(vq)).unwrap(), 1);
        assert_eq!(seen, vec![0x0102_0304]);
        assert_eq!(dispatcher.pending(), 0);
    }
}
