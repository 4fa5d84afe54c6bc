//! On-chip network between cores.
//!
//! Engines use it to execute packets on local cores and to forward into the next
//! engine's sender channel; workers use it to reach an engine's channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::trace;

use super::L1Memory;

/// Core coordinates on the NoC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NocXy {
    /// Column
    pub x: u16,
    /// Row
    pub y: u16,
}

impl NocXy {
    /// Create coordinates.
    #[must_use]
    pub const fn new(x: u16, y: u16) -> Self {
        Self { x, y }
    }

    /// Pack into one word (`x | y << 16`).
    #[must_use]
    pub const fn pack(self) -> u32 {
        self.x as u32 | ((self.y as u32) << 16)
    }

    /// Unpack from [`NocXy::pack`].
    #[must_use]
    pub const fn unpack(word: u32) -> Self {
        Self {
            x: word as u16,
            y: (word >> 16) as u16,
        }
    }
}

impl fmt::Display for NocXy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A byte address on a specific core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NocAddr {
    /// Target core
    pub core: NocXy,
    /// Byte offset in the core's memory
    pub addr: usize,
}

impl NocAddr {
    /// Create an address.
    #[must_use]
    pub const fn new(core: NocXy, addr: usize) -> Self {
        Self { core, addr }
    }

    /// Header encoding: core in the high word, offset in the low word.
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        ((self.core.pack() as u64) << 32) | (self.addr as u32 as u64)
    }

    /// Decode [`NocAddr::to_u64`].
    #[must_use]
    pub const fn from_u64(value: u64) -> Self {
        Self {
            core: NocXy::unpack((value >> 32) as u32),
            addr: value as u32 as usize,
        }
    }

    /// Same core, `offset` bytes further.
    #[must_use]
    pub const fn offset(self, offset: usize) -> Self {
        Self {
            core: self.core,
            addr: self.addr + offset,
        }
    }
}

/// NoC access failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NocError {
    /// No core is registered at the coordinates
    #[error("no core at {core}")]
    UnknownCore {
        /// Requested coordinates
        core: NocXy,
    },

    /// Access falls outside the core's memory
    #[error("access {addr:#x}+{len} out of bounds on core {core}")]
    OutOfBounds {
        /// Target core
        core: NocXy,
        /// Start offset
        addr: usize,
        /// Access length
        len: usize,
    },
}

/// Apply an increment with an optional wrap boundary.
///
/// With `wrap_boundary == 0` the word wraps at `u32::MAX`; otherwise it counts
/// `0..=wrap_boundary` and returns to zero past the boundary.
#[must_use]
pub fn wrapping_increment(value: u32, increment: u32, wrap_boundary: u32) -> u32 {
    if wrap_boundary == 0 {
        value.wrapping_add(increment)
    } else {
        ((u64::from(value) + u64::from(increment)) % (u64::from(wrap_boundary) + 1)) as u32
    }
}

/// On-chip network port.
pub trait Noc {
    /// Write `data` at `dst`.
    fn write(&self, dst: NocAddr, data: &[u8]) -> Result<(), NocError>;

    /// Write one word at `dst`.
    fn write_u32(&self, dst: NocAddr, value: u32) -> Result<(), NocError> {
        self.write(dst, &value.to_le_bytes())
    }

    /// Read one word from `src`.
    fn read_u32(&self, src: NocAddr) -> Result<u32, NocError>;

    /// Atomically increment the word at `dst`, returning its previous value.
    fn atomic_inc(&self, dst: NocAddr, increment: u32, wrap_boundary: u32)
    -> Result<u32, NocError>;

    /// Atomically replace the word at `dst` with `new` if it equals `expected`.
    ///
    /// Returns the previous value; the swap happened iff it equals `expected`.
    fn compare_swap(&self, dst: NocAddr, expected: u32, new: u32) -> Result<u32, NocError>;

    /// Whether every write issued through this port has landed.
    fn writes_flushed(&self) -> bool;
}

/// Registry of simulated cores shared by all ports.
#[derive(Debug, Clone, Default)]
pub struct SimNocFabric {
    cores: Arc<RwLock<HashMap<NocXy, L1Memory>>>,
}

impl SimNocFabric {
    /// Empty fabric.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `mem` reachable at `core`.
    pub fn register(&self, core: NocXy, mem: L1Memory) {
        self.cores
            .write()
            .expect("noc fabric lock poisoned")
            .insert(core, mem);
    }

    /// Memory of `core`, if registered.
    #[must_use]
    pub fn core(&self, core: NocXy) -> Option<L1Memory> {
        self.cores
            .read()
            .expect("noc fabric lock poisoned")
            .get(&core)
            .cloned()
    }

    /// New port whose writes take `flush_latency` polls of
    /// [`Noc::writes_flushed`] to report as landed.
    #[must_use]
    pub fn port(&self, flush_latency: u32) -> SimNoc {
        SimNoc {
            fabric: self.clone(),
            flush_latency,
            unflushed_polls: Arc::new(AtomicU32::new(0)),
        }
    }
}

/// One core's port into a [`SimNocFabric`].
#[derive(Debug, Clone)]
pub struct SimNoc {
    fabric: SimNocFabric,
    flush_latency: u32,
    unflushed_polls: Arc<AtomicU32>,
}

impl SimNoc {
    fn target(&self, dst: NocAddr, len: usize) -> Result<L1Memory, NocError> {
        let mem = self
            .fabric
            .core(dst.core)
            .ok_or(NocError::UnknownCore { core: dst.core })?;
        if !mem.contains(dst.addr, len) {
            return Err(NocError::OutOfBounds {
                core: dst.core,
                addr: dst.addr,
                len,
            });
        }
        Ok(mem)
    }

    fn issued(&self) {
        self.unflushed_polls
            .store(self.flush_latency, Ordering::Release);
    }
}

impl Noc for SimNoc {
    fn write(&self, dst: NocAddr, data: &[u8]) -> Result<(), NocError> {
        trace!(core = %dst.core, addr = dst.addr, len = data.len(), "noc write");
        self.target(dst, data.len())?.write(dst.addr, data);
        self.issued();
        Ok(())
    }

    fn read_u32(&self, src: NocAddr) -> Result<u32, NocError> {
        Ok(self.target(src, 4)?.read_u32(src.addr))
    }

    fn atomic_inc(
        &self,
        dst: NocAddr,
        increment: u32,
        wrap_boundary: u32,
    ) -> Result<u32, NocError> {
        let previous = self
            .target(dst, 4)?
            .update_u32(dst.addr, |value| wrapping_increment(value, increment, wrap_boundary));
        self.issued();
        Ok(previous)
    }

    fn compare_swap(&self, dst: NocAddr, expected: u32, new: u32) -> Result<u32, NocError> {
        let previous = self
            .target(dst, 4)?
            .update_u32(dst.addr, |value| if value == expected { new } else { value });
        Ok(previous)
    }

    fn writes_flushed(&self) -> bool {
        self.unflushed_polls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |polls| {
                polls.checked_sub(1)
            })
            .is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fabric_with_core() -> (SimNocFabric, L1Memory) {
        let fabric = SimNocFabric::new();
        let mem = L1Memory::new(128);
        fabric.register(NocXy::new(1, 2), mem.clone());
        (fabric, mem)
    }

    #[test]
    fn addr_roundtrips_through_header_encoding() {
        let addr = NocAddr::new(NocXy::new(3, 9), 0x1_2340);
        assert_eq!(NocAddr::from_u64(addr.to_u64()), addr);
        assert_eq!(addr.to_u64() >> 32, u64::from(3u32 | (9 << 16)));
    }

    #[test]
    fn increment_wraps_at_boundary() {
        assert_eq!(wrapping_increment(u32::MAX, 1, 0), 0);
        assert_eq!(wrapping_increment(2, 1, 3), 3);
        assert_eq!(wrapping_increment(3, 1, 3), 0);
        assert_eq!(wrapping_increment(3, 2, 3), 1);
    }

    #[test]
    fn writes_flush_after_latency() {
        let (fabric, mem) = fabric_with_core();
        let noc = fabric.port(2);
        let dst = NocAddr::new(NocXy::new(1, 2), 16);

        assert!(noc.writes_flushed());
        noc.write_u32(dst, 7).unwrap();
        assert_eq!(mem.read_u32(16), 7);
        assert!(!noc.writes_flushed());
        assert!(!noc.writes_flushed());
        assert!(noc.writes_flushed());
    }

    #[test]
    fn compare_swap_only_on_match() {
        let (fabric, mem) = fabric_with_core();
        let noc = fabric.port(0);
        let dst = NocAddr::new(NocXy::new(1, 2), 0);

        assert_eq!(noc.compare_swap(dst, 0, 1).unwrap(), 0);
        assert_eq!(noc.compare_swap(dst, 0, 5).unwrap(), 1);
        assert_eq!(mem.read_u32(0), 1);
    }

    #[test]
    fn unknown_core_and_bounds() {
        let (fabric, _mem) = fabric_with_core();
        let noc = fabric.port(0);

        let missing = noc.read_u32(NocAddr::new(NocXy::new(0, 0), 0));
        assert!(matches!(missing, Err(NocError::UnknownCore { .. })));

        let outside = noc.write(NocAddr::new(NocXy::new(1, 2), 126), &[0u8; 4]);
        assert!(matches!(outside, Err(NocError::OutOfBounds { len: 4, .. })));
    }
}
