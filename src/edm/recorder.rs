//! Post-mortem capture of recently processed packet headers.

use crate::protocol::{HEADER_SIZE, PacketHeader};
use crate::transport::L1Memory;

use super::config::RecorderRegion;

/// Ring of headers in scratch memory, overwritten oldest first.
#[derive(Debug, Clone)]
pub struct PacketHeaderRecorder {
    mem: L1Memory,
    base: usize,
    capacity: usize,
    index: usize,
    recorded: u64,
}

impl PacketHeaderRecorder {
    /// Recorder writing into `region` of `mem`.
    #[must_use]
    pub fn new(mem: L1Memory, region: RecorderRegion) -> Self {
        assert!(region.size_headers > 0, "recorder needs room for a header");
        Self {
            mem,
            base: region.address,
            capacity: region.size_headers,
            index: 0,
            recorded: 0,
        }
    }

    /// Append a header, overwriting the oldest once full.
    pub fn record(&mut self, header: &PacketHeader) {
        self.mem
            .write(self.base + self.index * HEADER_SIZE, &header.to_bytes());
        self.index += 1;
        if self.index == self.capacity {
            self.index = 0;
        }
        self.recorded += 1;
    }

    /// Headers recorded since start, including overwritten ones.
    #[must_use]
    pub const fn recorded(&self) -> u64 {
        self.recorded
    }

    /// Captured headers, oldest first.
    #[must_use]
    pub fn read_back(&self) -> Vec<PacketHeader> {
        let held = self.recorded.min(self.capacity as u64) as usize;
        let first = if held < self.capacity { 0 } else { self.index };
        (0..held)
            .filter_map(|i| {
                let slot = (first + i) % self.capacity;
                let bytes = self.mem.read(self.base + slot * HEADER_SIZE, HEADER_SIZE);
                PacketHeader::from_bytes(&bytes).ok()
            })
            .collect()
    }

    /// Write the captured headers to `path`, one line each.
    #[cfg(feature = "debug-tools")]
    pub fn dump_to(&self, path: &std::path::Path) -> std::io::Result<()> {
        use std::io::Write;

        let mut file = std::fs::File::create(path)?;
        for header in self.read_back() {
            writeln!(
                file,
                "dst={} cmd={:?} flags={} src_ch={} target={:#x} size={} valid={}",
                header.destination(),
                header.command(),
                header.routing_flags(),
                header.src_ch_id(),
                header.target(),
                header.payload_size(),
                header.is_valid(),
            )?;
        }
        file.flush()
    }
}
