//! Producer side of a sender channel connection.
//!
//! Workers and upstream engines attach to a sender channel through
//! [`WorkerToFabricSender`]: claim the channel, advertise where flow-control updates
//! go, write packets into slots, then detach.

use core::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace};

use crate::protocol::{self, Packet, encode};
use crate::transport::{
    ChannelBufferPointer, EthChannelBuffer, L1Memory, Noc, NocAddr, NocError, NocXy,
};

use super::worker::{
    CLAIM_CLOSED, CLAIM_FREE, CLAIM_OPEN, CONNECTION_LIVE, INFO_EDM_RDPTR, TEARDOWN_COMPLETE,
};

/// Where a producer finds one sender channel of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdmConnectionArgs {
    /// Engine core
    pub edm_core: NocXy,
    /// Channel geometry on the engine core
    pub channel: EthChannelBuffer,
    /// Connection-info record on the engine core
    pub connection_info_address: usize,
    /// Live flag on the engine core
    pub connection_live_address: usize,
    /// Packets-written counter on the engine core
    pub packets_written_address: usize,
    /// Claim word on the engine core
    pub claim_address: usize,
}

/// Where the engine reaches a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerLocation {
    /// Producer core
    pub core: NocXy,
    /// Word the engine writes its read pointer into
    pub read_ptr_address: usize,
    /// Word the engine sets once teardown finished
    pub teardown_address: usize,
}

/// Errors from the producer side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// Another producer owns the channel.
    ChannelBusy {
        /// Engine core
        core: NocXy,
        /// Sender channel id
        channel: u8,
    },
    /// A busy-wait exceeded the configured timeout.
    Timeout {
        /// Time spent waiting
        waited: Duration,
    },
    /// Operation requires an open connection.
    NotConnected,
    /// Packet does not fit a slot.
    Packet(protocol::Error),
    /// NoC access failed.
    Noc(NocError),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelBusy { core, channel } => {
                write!(f, "sender channel {channel} on {core} is owned by another producer")
            }
            Self::Timeout { waited } => write!(f, "timed out after {waited:?}"),
            Self::NotConnected => write!(f, "connection is not open"),
            Self::Packet(err) => write!(f, "packet error: {err}"),
            Self::Noc(err) => write!(f, "noc error: {err}"),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<NocError> for ConnectError {
    fn from(err: NocError) -> Self {
        Self::Noc(err)
    }
}

impl From<protocol::Error> for ConnectError {
    fn from(err: protocol::Error) -> Self {
        Self::Packet(err)
    }
}

fn spin_until(
    timeout: Option<Duration>,
    mut ready: impl FnMut() -> Result<bool, ConnectError>,
) -> Result<(), ConnectError> {
    let started = Instant::now();
    while !ready()? {
        if let Some(limit) = timeout {
            let waited = started.elapsed();
            if waited >= limit {
                return Err(ConnectError::Timeout { waited });
            }
        }
        std::hint::spin_loop();
    }
    Ok(())
}

/// Producer handle on one engine sender channel.
#[derive(Debug)]
pub struct WorkerToFabricSender<N> {
    noc: N,
    local: L1Memory,
    edm: EdmConnectionArgs,
    worker: WorkerLocation,
    wrptr: ChannelBufferPointer,
    connected: bool,
    timeout: Option<Duration>,
}

impl<N: Noc> WorkerToFabricSender<N> {
    /// Create a disconnected handle for a producer whose memory is `local`.
    #[must_use]
    pub fn new(noc: N, local: L1Memory, edm: EdmConnectionArgs, worker: WorkerLocation) -> Self {
        Self {
            noc,
            local,
            wrptr: ChannelBufferPointer::new(edm.channel.num_buffers()),
            edm,
            worker,
            connected: false,
            timeout: None,
        }
    }

    /// Bound every busy-wait of this handle.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Target channel.
    #[must_use]
    pub const fn edm(&self) -> &EdmConnectionArgs {
        &self.edm
    }

    /// Whether the connection is open.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        self.connected
    }

    /// Write pointer as published to the engine; wraps at twice the slot count.
    #[must_use]
    pub const fn packets_written(&self) -> u32 {
        self.wrptr.as_u32()
    }

    fn edm_addr(&self, addr: usize) -> NocAddr {
        NocAddr::new(self.edm.edm_core, addr)
    }

    /// Claim the channel if it is free; never waits.
    #[instrument(level = "debug", skip(self), fields(core = %self.edm.edm_core, channel = self.edm.channel.id()))]
    pub fn try_open(&mut self) -> Result<(), ConnectError> {
        let previous =
            self.noc
                .compare_swap(self.edm_addr(self.edm.claim_address), CLAIM_FREE, CLAIM_OPEN)?;
        if previous != CLAIM_FREE {
            return Err(ConnectError::ChannelBusy {
                core: self.edm.edm_core,
                channel: self.edm.channel.id(),
            });
        }

        let rdptr = self
            .noc
            .read_u32(self.edm_addr(self.edm.connection_info_address + INFO_EDM_RDPTR))?;
        self.wrptr = ChannelBufferPointer::from_raw(rdptr, self.edm.channel.num_buffers());
        self.local.write_u32(self.worker.read_ptr_address, rdptr);
        self.local.write_u32(self.worker.teardown_address, 0);

        let mut info = [0u8; 12];
        info[0..4].copy_from_slice(&self.worker.core.pack().to_le_bytes());
        info[4..8].copy_from_slice(&(self.worker.read_ptr_address as u32).to_le_bytes());
        info[8..12].copy_from_slice(&(self.worker.teardown_address as u32).to_le_bytes());
        self.noc
            .write(self.edm_addr(self.edm.connection_info_address), &info)?;
        self.noc
            .write_u32(self.edm_addr(self.edm.connection_live_address), CONNECTION_LIVE)?;

        self.connected = true;
        debug!(rdptr, "connection open");
        Ok(())
    }

    /// Wait for the channel to become free, then claim it.
    pub fn open(&mut self) -> Result<(), ConnectError> {
        spin_until(self.timeout, || match self.try_open() {
            Ok(()) => Ok(true),
            Err(ConnectError::ChannelBusy { .. }) => Ok(false),
            Err(err) => Err(err),
        })
    }

    /// Whether the next slot is free; never waits.
    #[must_use]
    pub fn has_space_for_packet(&self) -> bool {
        let num_buffers = self.edm.channel.num_buffers();
        let rdptr = ChannelBufferPointer::from_raw(
            self.local.read_u32(self.worker.read_ptr_address),
            num_buffers,
        );
        (rdptr.distance_behind(&self.wrptr) as usize) < num_buffers
    }

    /// Wait until the next slot is free.
    pub fn wait_for_empty_write_slot(&self) -> Result<(), ConnectError> {
        spin_until(self.timeout, || Ok(self.has_space_for_packet()))
    }

    /// Write `packet` into the next slot and notify the engine.
    ///
    /// The caller checks [`Self::has_space_for_packet`] first.
    pub fn send_packet(&mut self, packet: &Packet) -> Result<(), ConnectError> {
        let size = packet.size_including_header();
        let max = self.edm.channel.buffer_size();
        if size > max {
            return Err(protocol::Error::PayloadTooLarge { size, max }.into());
        }
        self.send_slot_bytes(&encode(packet))
    }

    /// Write an already encoded slot image and notify the engine.
    pub(crate) fn send_slot_bytes(&mut self, bytes: &[u8]) -> Result<(), ConnectError> {
        if !self.connected {
            return Err(ConnectError::NotConnected);
        }
        debug_assert!(self.has_space_for_packet(), "send without a free slot");

        let index = self.wrptr.get_buffer_index();
        let slot = self.edm.channel.get_buffer_address(index);
        self.noc.write(self.edm_addr(slot), bytes)?;
        self.noc
            .atomic_inc(
                self.edm_addr(self.edm.packets_written_address),
                1,
                self.wrptr.wrap_boundary(),
            )?;
        self.wrptr.increment();
        trace!(slot = index, len = bytes.len(), "packet written");
        Ok(())
    }

    /// Detach; the engine frees the channel once everything sent has completed.
    #[instrument(level = "debug", skip(self), fields(core = %self.edm.edm_core, channel = self.edm.channel.id()))]
    pub fn close(&mut self) -> Result<(), ConnectError> {
        if !self.connected {
            return Err(ConnectError::NotConnected);
        }
        self.noc
            .write_u32(self.edm_addr(self.edm.claim_address), CLAIM_CLOSED)?;
        self.noc
            .write_u32(self.edm_addr(self.edm.connection_live_address), 0)?;
        self.connected = false;
        debug!(written = self.wrptr.as_u32(), "connection closed");
        Ok(())
    }

    /// Whether the engine has finished tearing down the last connection.
    #[must_use]
    pub fn teardown_complete(&self) -> bool {
        self.local.read_u32(self.worker.teardown_address) == TEARDOWN_COMPLETE
    }

    /// Wait until the engine has torn the connection down.
    pub fn wait_teardown_complete(&self) -> Result<(), ConnectError> {
        spin_until(self.timeout, || Ok(self.teardown_complete()))
    }
}
