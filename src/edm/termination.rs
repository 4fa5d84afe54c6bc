//! Termination requests written into the engine's scratch memory.

use crate::transport::L1Memory;

/// Value of the termination word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum TerminationSignal {
    /// Keep iterating
    KeepRunning = 0,
    /// Stop once every channel has drained
    GracefullyTerminate = 1,
    /// Stop at the next iteration
    ImmediatelyTerminate = 2,
}

impl TerminationSignal {
    /// Convert from word; unknown values read as keep-running
    #[must_use]
    pub const fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::GracefullyTerminate,
            2 => Self::ImmediatelyTerminate,
            _ => Self::KeepRunning,
        }
    }

    /// Convert to word
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self as u32
    }

    /// Read the signal at `addr`
    #[must_use]
    pub fn read(mem: &L1Memory, addr: usize) -> Self {
        Self::from_u32(mem.read_u32(addr))
    }

    /// Write the signal at `addr`
    pub fn write(self, mem: &L1Memory, addr: usize) {
        mem.write_u32(addr, self.as_u32());
    }
}
