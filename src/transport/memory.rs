//! Core-local scratch memory ("L1").
//!
//! Every core in the simulated fabric owns one flat byte array. Engines and workers
//! address it by byte offset; remote cores reach it only through the link or the NoC.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to a core's scratch memory.
#[derive(Clone)]
pub struct L1Memory {
    inner: Arc<Mutex<Box<[u8]>>>,
    size: usize,
}

impl L1Memory {
    /// Allocate zeroed memory of `size` bytes.
    #[must_use]
    pub fn new(size: usize) -> Self {
        assert!(size > 0, "l1 size must be positive");
        Self {
            inner: Arc::new(Mutex::new(vec![0u8; size].into_boxed_slice())),
            size,
        }
    }

    /// Size in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Whether `[addr, addr + len)` lies inside this memory.
    #[must_use]
    pub const fn contains(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => end <= self.size,
            None => false,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<[u8]>> {
        self.inner.lock().expect("l1 memory mutex poisoned")
    }

    fn check(&self, addr: usize, len: usize) {
        assert!(
            self.contains(addr, len),
            "l1 access out of bounds: {addr:#x}+{len} (size {:#x})",
            self.size
        );
    }

    /// Copy `out.len()` bytes starting at `addr`.
    pub fn read_into(&self, addr: usize, out: &mut [u8]) {
        self.check(addr, out.len());
        out.copy_from_slice(&self.lock()[addr..addr + out.len()]);
    }

    /// Read `len` bytes starting at `addr`.
    #[must_use]
    pub fn read(&self, addr: usize, len: usize) -> Vec<u8> {
        let mut out = vec![0u8; len];
        self.read_into(addr, &mut out);
        out
    }

    /// Write `data` at `addr`.
    pub fn write(&self, addr: usize, data: &[u8]) {
        self.check(addr, data.len());
        self.lock()[addr..addr + data.len()].copy_from_slice(data);
    }

    /// Zero `len` bytes at `addr`.
    pub fn fill_zero(&self, addr: usize, len: usize) {
        self.check(addr, len);
        self.lock()[addr..addr + len].fill(0);
    }

    /// Read a little-endian word.
    #[must_use]
    pub fn read_u32(&self, addr: usize) -> u32 {
        let mut word = [0u8; 4];
        self.read_into(addr, &mut word);
        u32::from_le_bytes(word)
    }

    /// Write a little-endian word.
    pub fn write_u32(&self, addr: usize, value: u32) {
        self.write(addr, &value.to_le_bytes());
    }

    /// Apply `update` to the word at `addr` under the lock, returning the previous value.
    pub fn update_u32(&self, addr: usize, update: impl FnOnce(u32) -> u32) -> u32 {
        self.check(addr, 4);
        let mut guard = self.lock();
        let mut word = [0u8; 4];
        word.copy_from_slice(&guard[addr..addr + 4]);
        let previous = u32::from_le_bytes(word);
        guard[addr..addr + 4].copy_from_slice(&update(previous).to_le_bytes());
        previous
    }

    /// Copy `len` bytes from `src` in this memory to `dst` in `other`.
    ///
    /// `other` may be this memory; the copy goes through a temporary so overlapping
    /// regions and self-copies are fine.
    pub fn copy_to(&self, src: usize, other: &Self, dst: usize, len: usize) {
        let bytes = self.read(src, len);
        other.write(dst, &bytes);
    }
}

impl fmt::Debug for L1Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("L1Memory")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}
