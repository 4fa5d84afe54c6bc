//! Engine side of a sender channel's producer connection.

use tracing::{debug, warn};

use crate::transport::{ChannelBufferPointer, L1Memory, Noc, NocAddr, NocError, NocXy};

use super::adapter::WorkerLocation;

/// Bytes reserved for a connection-info record.
pub const CONNECTION_INFO_SIZE: usize = 32;

const INFO_WORKER_XY: usize = 0;
const INFO_WORKER_READ_PTR_ADDRESS: usize = 4;
const INFO_WORKER_TEARDOWN_ADDRESS: usize = 8;
/// Offset of the engine's published read pointer within a connection-info record.
pub const INFO_EDM_RDPTR: usize = 12;

/// Channel claim word: no producer owns the channel.
pub const CLAIM_FREE: u32 = 0;
/// Channel claim word: a producer owns the channel.
pub const CLAIM_OPEN: u32 = 1;
/// Channel claim word: the owner closed; released by the engine after teardown.
pub const CLAIM_CLOSED: u32 = 2;

/// Connection live semaphore value while a producer is attached.
pub const CONNECTION_LIVE: u32 = 1;

/// Written to the producer's teardown word once the channel is free again.
pub const TEARDOWN_COMPLETE: u32 = 1;

/// Per sender channel connection state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// A producer has been observed and trusted
    pub connected: bool,
    /// Read pointer last published to the producer
    pub worker_rdptr: u32,
    /// The producer has asked to detach
    pub teardown_requested: bool,
}

/// Engine-side view of the producer attached to one sender channel.
///
/// Holds the channel's three local cursors: `local_wrptr` (packets sent over the link),
/// `local_ackptr` (packets the receiver acknowledged) and `local_rdptr` (packets the
/// receiver completed).
#[derive(Debug, Clone)]
pub struct EdmChannelWorkerInterface {
    channel: u8,
    info_address: usize,
    live_address: usize,
    packets_written_address: usize,
    claim_address: usize,
    /// Packets sent over the link
    pub local_wrptr: ChannelBufferPointer,
    /// Packets acknowledged by the receiver
    pub local_ackptr: ChannelBufferPointer,
    /// Packets completed by the receiver
    pub local_rdptr: ChannelBufferPointer,
    state: ConnectionState,
}

impl EdmChannelWorkerInterface {
    /// Interface for sender channel `channel` with `num_buffers` slots.
    #[must_use]
    pub fn new(
        channel: u8,
        num_buffers: usize,
        info_address: usize,
        live_address: usize,
        packets_written_address: usize,
        claim_address: usize,
    ) -> Self {
        Self {
            channel,
            info_address,
            live_address,
            packets_written_address,
            claim_address,
            local_wrptr: ChannelBufferPointer::new(num_buffers),
            local_ackptr: ChannelBufferPointer::new(num_buffers),
            local_rdptr: ChannelBufferPointer::new(num_buffers),
            state: ConnectionState::default(),
        }
    }

    /// Sender channel id.
    #[must_use]
    pub const fn channel(&self) -> u8 {
        self.channel
    }

    /// Connection state.
    #[must_use]
    pub const fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Publish a zero read pointer before any producer connects.
    pub fn init(&self, mem: &L1Memory) {
        mem.write_u32(self.info_address + INFO_EDM_RDPTR, 0);
    }

    /// Whether the producer has written packets the engine has not sent yet.
    #[must_use]
    pub fn has_unsent_payload(&self, mem: &L1Memory) -> bool {
        mem.read_u32(self.packets_written_address) != self.local_wrptr.as_u32()
    }

    /// Whether every sent packet has been acknowledged.
    #[must_use]
    pub fn all_eth_packets_acked(&self) -> bool {
        self.local_ackptr.is_caught_up_to(&self.local_wrptr)
    }

    /// Whether every sent packet has been completed.
    #[must_use]
    pub fn all_eth_packets_completed(&self) -> bool {
        self.local_rdptr.is_caught_up_to(&self.local_wrptr)
    }

    /// Whether the producer's live flag is set.
    #[must_use]
    pub fn connection_is_live(&self, mem: &L1Memory) -> bool {
        mem.read_u32(self.live_address) == CONNECTION_LIVE
    }

    /// Current claim word.
    #[must_use]
    pub fn claim_state(&self, mem: &L1Memory) -> u32 {
        mem.read_u32(self.claim_address)
    }

    /// Whether a connected producer asked to detach.
    #[must_use]
    pub fn has_worker_teardown_request(&self, mem: &L1Memory) -> bool {
        self.state.connected && !self.connection_is_live(mem)
    }

    /// Producer location from the connection-info record.
    #[must_use]
    pub fn worker_location(&self, mem: &L1Memory) -> WorkerLocation {
        WorkerLocation {
            core: NocXy::unpack(mem.read_u32(self.info_address + INFO_WORKER_XY)),
            read_ptr_address: mem.read_u32(self.info_address + INFO_WORKER_READ_PTR_ADDRESS)
                as usize,
            teardown_address: mem.read_u32(self.info_address + INFO_WORKER_TEARDOWN_ADDRESS)
                as usize,
        }
    }

    /// Try to establish the connection; returns true if it changed state.
    ///
    /// A producer that opened and closed before the engine looked leaves the claim word
    /// at [`CLAIM_CLOSED`]; that still counts as a connection so it is torn down
    /// properly. Packets written without a live flag are treated the same way.
    pub fn poll_connect(&mut self, mem: &L1Memory, noc: &impl Noc) -> Result<bool, NocError> {
        let live = self.connection_is_live(mem);
        let implicit = !live
            && (self.claim_state(mem) == CLAIM_CLOSED || self.has_unsent_payload(mem));
        if !live && !implicit {
            return Ok(false);
        }
        if implicit {
            warn!(
                channel = self.channel,
                "traffic from a producer whose connection was not observed; connecting implicitly"
            );
        }

        self.state.connected = true;
        self.state.teardown_requested = implicit;
        debug!(channel = self.channel, worker = %self.worker_location(mem).core, "producer connected");
        self.update_worker_copy_of_read_ptr(mem, noc)?;
        Ok(true)
    }

    /// Publish the acknowledged pointer to the producer's flow-control word.
    pub fn update_worker_copy_of_read_ptr(
        &mut self,
        mem: &L1Memory,
        noc: &impl Noc,
    ) -> Result<(), NocError> {
        let worker = self.worker_location(mem);
        let rdptr = self.local_ackptr.as_u32();
        noc.write_u32(NocAddr::new(worker.core, worker.read_ptr_address), rdptr)?;
        self.state.worker_rdptr = rdptr;
        Ok(())
    }

    /// Release the channel once everything the producer sent has completed.
    ///
    /// Publishes the read pointer for the next producer, signals the current one and
    /// frees the claim word.
    pub fn teardown_connection(&mut self, mem: &L1Memory, noc: &impl Noc) -> Result<(), NocError> {
        debug_assert!(self.all_eth_packets_completed());
        let worker = self.worker_location(mem);
        mem.write_u32(self.info_address + INFO_EDM_RDPTR, self.local_rdptr.as_u32());
        noc.write_u32(
            NocAddr::new(worker.core, worker.teardown_address),
            TEARDOWN_COMPLETE,
        )?;
        mem.write_u32(self.claim_address, CLAIM_FREE);
        self.state = ConnectionState::default();
        debug!(channel = self.channel, rdptr = self.local_rdptr.get_ptr(), "connection torn down");
        Ok(())
    }
}
