//! Shared memory regions
//!
//! A [`SharedMemory`] is the byte window both peers see. On target it is a
//! carve-out mapped uncached ([`MappedRegion`]); on the host the two
//! "processors" are threads sharing a [`HeapRegion`].
//!
//! Accessors carry no ordering of their own. The hardware spinlock's
//! acquire/release provides it.

use core::ptr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Byte window shared with the peer processor
pub trait SharedMemory: Send + Sync {
    /// Region size in bytes
    fn len(&self) -> usize;

    /// Whether the region is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load a little-endian u32 at `offset`
    fn load_u32(&self, offset: usize) -> u32 {
        let mut word = [0u8; 4];
        self.read_bytes(offset, &mut word);
        u32::from_le_bytes(word)
    }

    /// Store a little-endian u32 at `offset`
    fn store_u32(&self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the region
    fn read_bytes(&self, offset: usize, dst: &mut [u8]);

    /// Copy `src` into the region starting at `offset`
    fn write_bytes(&self, offset: usize, src: &[u8]);
}

fn check_range(offset: usize, len: usize, size: usize) {
    assert!(
        offset.checked_add(len).is_some_and(|end| end <= size),
        "shared memory access {:#x}+{:#x} outside {:#x}-byte region",
        offset,
        len,
        size
    );
}

/// Host-memory region; clones alias the same bytes
#[derive(Clone)]
pub struct HeapRegion {
    bytes: Arc<[AtomicU8]>,
}

impl HeapRegion {
    /// Allocate a zeroed region of `len` bytes
    pub fn new(len: usize) -> Self {
        Self {
            bytes: (0..len).map(|_| AtomicU8::new(0)).collect(),
        }
    }
}

impl core::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapRegion").field("len", &self.bytes.len()).finish()
    }
}

impl SharedMemory for HeapRegion {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        check_range(offset, dst.len(), self.bytes.len());
        for (d, s) in dst.iter_mut().zip(&self.bytes[offset..]) {
            *d = s.load(Ordering::Relaxed);
        }
    }

    fn write_bytes(&self, offset: usize, src: &[u8]) {
        check_range(offset, src.len(), self.bytes.len());
        for (d, s) in self.bytes[offset..].iter().zip(src) {
            d.store(*s, Ordering::Relaxed);
        }
    }
}

/// Mapped shared-memory carve-out
pub struct MappedRegion {
    base: *mut u8,
    len: usize,
}

// SAFETY: concurrent access is serialized by the hardware spinlock guarding
// every user of the region; the mapping outlives the value per `new`.
unsafe impl Send for MappedRegion {}
unsafe impl Sync for MappedRegion {}

impl MappedRegion {
    /// Wrap a mapped carve-out
    ///
    /// # Safety
    /// `base` must be 4-byte aligned and point to `len` bytes of memory
    /// mapped for the lifetime of the returned value, shared only with
    /// peers that follow the same locking protocol.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        debug_assert!(base as usize % 4 == 0, "shared region must be word aligned");
        Self { base, len }
    }
}

impl SharedMemory for MappedRegion {
    fn len(&self) -> usize {
        self.len
    }

    fn load_u32(&self, offset: usize) -> u32 {
        check_range(offset, 4, self.len);
        if offset % 4 == 0 {
            // SAFETY: in range and aligned; mapping valid per `new`.
            u32::from_le(unsafe { ptr::read_volatile(self.base.add(offset) as *const u32) })
        } else {
            let mut word = [0u8; 4];
            self.read_bytes(offset, &mut word);
            u32::from_le_bytes(word)
        }
    }

    fn store_u32(&self, offset: usize, value: u32) {
        check_range(offset, 4, self.len);
        if offset % 4 == 0 {
            // SAFETY: in range and aligned; mapping valid per `new`.
            unsafe { ptr::write_volatile(self.base.add(offset) as *mut u32, value.to_le()) }
        } else {
            self.write_bytes(offset, &value.to_le_bytes());
        }
    }

    fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        check_range(offset, dst.len(), self.len);
        for (i, d) in dst.iter_mut().enumerate() {
            // SAFETY: range checked above.
            *d = unsafe { ptr::read_volatile(self.base.add(offset + i)) };
        }
    }

    fn write_bytes(&self, offset: usize, src: &[u8]) {
        check_range(offset, src.len(), self.len);
        for (i, s) in src.iter().enumerate() {
            // SAFETY: range checked above.
            unsafe { ptr::write_volatile(self.base.add(offset + i), *s) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_region_clones_alias() {
        let a = HeapRegion::new(16);
        let b = a.clone();

        a.write_bytes(3, b"abc");
        let mut out = [0u8; 3];
        b.read_bytes(3, &mut out);
        assert_eq!(&out, b"abc");

        b.store_u32(8, 0x0403_0201);
        let mut raw = [0u8; 4];
        a.read_bytes(8, &mut raw);
        assert_eq!(raw, [1, 2, 3, 4]);
        assert_eq!(a.load_u32(8), 0x0403_0201);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn test_heap_region_bounds() {
        let region = HeapRegion::new(8);
        region.write_bytes(6, &[0; 4]);
    }

    #[test]
    fn test_mapped_region_word_and_bytes() {
        let mut backing = [0u32; 4];
        let region = unsafe { MappedRegion::new(backing.as_mut_ptr() as *mut u8, 16) };

        region.store_u32(0, 0xaabb_ccdd);
        assert_eq!(region.load_u32(0), 0xaabb_ccdd);

        let mut first = [0u8; 2];
        region.read_bytes(0, &mut first);
        assert_eq!(first, [0xdd, 0xcc]);

        region.write_bytes(5, &[1, 2, 3, 4]);
        assert_eq!(region.load_u32(5), 0x0403_0201);
        assert_eq!(region.len(), 16);
    }
}
