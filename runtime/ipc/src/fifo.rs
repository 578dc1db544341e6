//! Hardware-spinlock guarded shared-memory FIFO
//!
//! # Memory Layout
//! `[count: u32 LE][data: capacity bytes]`. `count` is the number of
//! unread bytes and the only shared bookkeeping; cursors are private to
//! each endpoint.
//!
//! # Invariants
//! - `0 <= count <= capacity`
//! - The writer stores `count + len` only after checking
//!   `len <= capacity - count`; the reader stores `count - n` only after
//!   copying `n` bytes out
//! - Every access to `count` and the data area happens with the hardware
//!   lock held
//! - A failed operation leaves `count` and both cursors unchanged

use std::sync::atomic::{fence, AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use atlas_hwspinlock::HwLock;
use static_assertions::const_assert_eq;

use crate::config::FifoConfig;
use crate::doorbell::Doorbell;
use crate::shmem::SharedMemory;
use crate::{ConfigError, FifoError, IpcError, Result};

/// Size of the shared count header
pub const HEADER_SIZE: usize = core::mem::size_of::<u32>();
const_assert_eq!(HEADER_SIZE, 4);

const COUNT_OFFSET: usize = 0;
const DATA_OFFSET: usize = HEADER_SIZE;

/// Counters kept by the local side of a FIFO
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FifoStats {
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub writes: u64,
    pub reads: u64,
    pub busy: u64,
    pub empty: u64,
    pub overflows: u64,
    pub lock_timeouts: u64,
}

#[derive(Default)]
struct Counters {
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    writes: AtomicU64,
    reads: AtomicU64,
    busy: AtomicU64,
    empty: AtomicU64,
    overflows: AtomicU64,
    lock_timeouts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn record_error(&self, err: &FifoError) {
        match err {
            FifoError::Busy { .. } => Self::bump(&self.busy, 1),
            FifoError::Empty => Self::bump(&self.empty, 1),
            FifoError::Overflow { .. } => Self::bump(&self.overflows, 1),
            FifoError::Lock(_) => Self::bump(&self.lock_timeouts, 1),
            FifoError::Corrupt { .. } => {}
        }
    }

    fn snapshot(&self) -> FifoStats {
        FifoStats {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            empty: self.empty.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Shared state of one FIFO direction
///
/// One side calls [`ShmemFifo::init`] at subsystem start. Each side then
/// takes the endpoint it drives: [`ShmemFifo::writer`] or
/// [`ShmemFifo::reader`]; each can be taken once at a time.
pub struct ShmemFifo<M: SharedMemory, L: HwLock> {
    memory: M,
    lock: L,
    capacity: usize,
    lock_timeout: Duration,
    writer_taken: AtomicBool,
    reader_taken: AtomicBool,
    counters: Counters,
}

impl<M: SharedMemory, L: HwLock> ShmemFifo<M, L> {
    /// Lay a FIFO over `memory`, guarded by `lock`
    ///
    /// # Errors
    /// Invalid `config`, or `memory` smaller than header plus capacity.
    pub fn new(memory: M, lock: L, config: &FifoConfig) -> core::result::Result<Arc<Self>, ConfigError> {
        config.validate()?;
        config.check_region(memory.len())?;

        log::debug!(
            "fifo {}: capacity {} bytes, lock timeout {:?}",
            lock.id(),
            config.capacity,
            config.lock_timeout()
        );

        Ok(Arc::new(Self {
            memory,
            lock,
            capacity: config.capacity,
            lock_timeout: config.lock_timeout(),
            writer_taken: AtomicBool::new(false),
            reader_taken: AtomicBool::new(false),
            counters: Counters::default(),
        }))
    }

    /// Zero the shared count (subsystem start)
    pub fn init(&self) -> Result<()> {
        let _guard = self.lock.lock_timeout(self.lock_timeout)?;
        self.memory.store_u32(COUNT_OFFSET, 0);
        Ok(())
    }

    /// Hard reset after loss of synchrony
    ///
    /// Discards unread data. Both endpoints must [`FifoWriter::rewind`] /
    /// [`FifoReader::rewind`] their cursors before further use.
    pub fn reset(&self) -> Result<()> {
        let _guard = self.lock.lock_timeout(self.lock_timeout)?;
        let stale = self.memory.load_u32(COUNT_OFFSET);
        self.memory.store_u32(COUNT_OFFSET, 0);
        log::warn!("fifo {}: reset, {} unread bytes dropped", self.lock.id(), stale);
        Ok(())
    }

    /// Data area size in bytes
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Unread bytes, sampled under the lock
    pub fn len(&self) -> Result<usize> {
        let _guard = self.lock.lock_timeout(self.lock_timeout)?;
        self.load_count()
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn stats(&self) -> FifoStats {
        self.counters.snapshot()
    }

    pub fn lock(&self) -> &L {
        &self.lock
    }

    /// Take the writing endpoint
    pub fn writer<D: Doorbell>(self: &Arc<Self>, doorbell: D) -> core::result::Result<FifoWriter<M, L, D>, IpcError> {
        if self.writer_taken.swap(true, Ordering::AcqRel) {
            return Err(IpcError::EndpointTaken("writer"));
        }
        Ok(FifoWriter {
            fifo: Arc::clone(self),
            write_pos: 0,
            doorbell,
        })
    }

    /// Take the reading endpoint
    pub fn reader(self: &Arc<Self>) -> core::result::Result<FifoReader<M, L>, IpcError> {
        if self.reader_taken.swap(true, Ordering::AcqRel) {
            return Err(IpcError::EndpointTaken("reader"));
        }
        Ok(FifoReader {
            fifo: Arc::clone(self),
            read_pos: 0,
        })
    }

    /// Give back the lock once no endpoint or other handle remains
    pub fn into_lock(self: Arc<Self>) -> core::result::Result<L, Arc<Self>> {
        Arc::try_unwrap(self).map(|fifo| fifo.lock)
    }

    /// Read `count`; caller holds the lock
    fn load_count(&self) -> Result<usize> {
        let count = self.memory.load_u32(COUNT_OFFSET) as usize;
        if count > self.capacity {
            log::error!(
                "fifo {}: count {} exceeds capacity {}",
                self.lock.id(),
                count,
                self.capacity
            );
            return Err(FifoError::Corrupt {
                count,
                capacity: self.capacity,
            });
        }
        Ok(count)
    }

    /// Store `count`; caller holds the lock
    fn store_count(&self, count: usize) {
        debug_assert!(count <= self.capacity);
        self.memory.store_u32(COUNT_OFFSET, count as u32);
    }

    /// Copy `data` in at `pos`, wrapping; caller holds the lock
    fn copy_in(&self, pos: usize, data: &[u8]) {
        let first = data.len().min(self.capacity - pos);
        self.memory.write_bytes(DATA_OFFSET + pos, &data[..first]);
        self.memory.write_bytes(DATA_OFFSET, &data[first..]);
    }

    /// Copy out to `buf` from `pos`, wrapping; caller holds the lock
    fn copy_out(&self, pos: usize, buf: &mut [u8]) {
        let first = buf.len().min(self.capacity - pos);
        let (head, tail) = buf.split_at_mut(first);
        self.memory.read_bytes(DATA_OFFSET + pos, head);
        self.memory.read_bytes(DATA_OFFSET, tail);
    }

    fn write_locked(&self, write_pos: usize, data: &[u8]) -> Result<()> {
        let len = data.len();
        if len > self.capacity {
            return Err(FifoError::Overflow {
                len,
                capacity: self.capacity,
            });
        }

        let _guard = self.lock.lock_timeout(self.lock_timeout)?;
        let count = self.load_count()?;
        let free = self.capacity - count;
        if len > free {
            return Err(FifoError::Busy { len, free });
        }

        self.copy_in(write_pos, data);
        self.store_count(count + len);
        Ok(())
    }

    fn read_locked(&self, read_pos: usize, buf: &mut [u8]) -> Result<usize> {
        let _guard = self.lock.lock_timeout(self.lock_timeout)?;
        let count = self.load_count()?;
        if count == 0 {
            return Err(FifoError::Empty);
        }

        let n = buf.len().min(count);
        self.copy_out(read_pos, &mut buf[..n]);
        self.store_count(count - n);
        Ok(n)
    }
}

/// Producer endpoint
pub struct FifoWriter<M: SharedMemory, L: HwLock, D: Doorbell> {
    fifo: Arc<ShmemFifo<M, L>>,
    write_pos: usize,
    doorbell: D,
}

impl<M: SharedMemory, L: HwLock, D: Doorbell> FifoWriter<M, L, D> {
    /// Append `data` as one unit and ring the peer
    ///
    /// # Errors
    /// - [`FifoError::Overflow`] if `data` is larger than the FIFO
    /// - [`FifoError::Busy`] if the peer has not drained enough space
    /// - [`FifoError::Lock`] if the hardware lock timed out (fatal)
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }

        let fifo = &*self.fifo;
        if let Err(err) = fifo.write_locked(self.write_pos, data) {
            fifo.counters.record_error(&err);
            if let FifoError::Busy { len, free } = err {
                log::debug!("fifo {}: busy ({} bytes, {} free)", fifo.lock.id(), len, free);
            }
            return Err(err);
        }

        self.write_pos = (self.write_pos + data.len()) % fifo.capacity;
        Counters::bump(&fifo.counters.writes, 1);
        Counters::bump(&fifo.counters.bytes_written, data.len() as u64);

        // Data and count must be visible before the peer takes the interrupt.
        fence(Ordering::SeqCst);
        self.doorbell.ring();
        Ok(())
    }

    /// Current private write cursor
    pub fn position(&self) -> usize {
        self.write_pos
    }

    /// Restart at offset 0 after [`ShmemFifo::reset`]
    pub fn rewind(&mut self) {
        self.write_pos = 0;
    }

    /// Reset the shared FIFO and this cursor
    pub fn reset(&mut self) -> Result<()> {
        self.fifo.reset()?;
        self.rewind();
        Ok(())
    }

    pub fn fifo(&self) -> &Arc<ShmemFifo<M, L>> {
        &self.fifo
    }

    pub fn doorbell(&self) -> &D {
        &self.doorbell
    }
}

impl<M: SharedMemory, L: HwLock, D: Doorbell> Drop for FifoWriter<M, L, D> {
    fn drop(&mut self) {
        self.fifo.writer_taken.store(false, Ordering::Release);
    }
}

/// Consumer endpoint
pub struct FifoReader<M: SharedMemory, L: HwLock> {
    fifo: Arc<ShmemFifo<M, L>>,
    read_pos: usize,
}

impl<M: SharedMemory, L: HwLock> FifoReader<M, L> {
    /// Copy out up to `buf.len()` unread bytes
    ///
    /// Returns the number of bytes read.
    ///
    /// # Errors
    /// - [`FifoError::Empty`] if nothing is unread
    /// - [`FifoError::Lock`] if the hardware lock timed out (fatal)
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let fifo = &*self.fifo;
        match fifo.read_locked(self.read_pos, buf) {
            Ok(n) => {
                self.read_pos = (self.read_pos + n) % fifo.capacity;
                Counters::bump(&fifo.counters.reads, 1);
                Counters::bump(&fifo.counters.bytes_read, n as u64);
                Ok(n)
            }
            Err(err) => {
                fifo.counters.record_error(&err);
                Err(err)
            }
        }
    }

    /// Current private read cursor
    pub fn position(&self) -> usize {
        self.read_pos
    }

    /// Restart at offset 0 after [`ShmemFifo::reset`]
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    /// Reset the shared FIFO and this cursor
    pub fn reset(&mut self) -> Result<()> {
        self.fifo.reset()?;
        self.rewind();
        Ok(())
    }

    pub fn fifo(&self) -> &Arc<ShmemFifo<M, L>> {
        &self.fifo
    }
}

impl<M: SharedMemory, L: HwLock> Drop for FifoReader<M, L> {
    fn drop(&mut self) {
        self.fifo.reader_taken.store(false, Ordering::Release);
    }
}
