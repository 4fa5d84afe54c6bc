//! Sender channel step: drain a producer's packets onto the link.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::protocol::{ChannelCounters, HEADER_SIZE, PacketHeader};
use crate::transport::{
    CHANNEL_SYNC_SIZE, ChannelBufferPointer, ChannelSync, CreditCounter, EthChannelBuffer,
    EthLink, Noc, StreamId,
};

use super::engine::EngineIo;
use super::error::{EngineError, Result};
use super::recorder::PacketHeaderRecorder;
use super::worker::EdmChannelWorkerInterface;

/// Sender-side view of the peer's receiver channel, shared by both sender channels.
#[derive(Debug, Clone)]
pub struct OutboundReceiverChannelPointers {
    /// Packets pushed into the peer's receiver channel
    pub wrptr: ChannelBufferPointer,
    /// Packets the peer acknowledged
    pub ack_ptr: ChannelBufferPointer,
    /// Packets the peer completed
    pub completion_ptr: ChannelBufferPointer,
}

impl OutboundReceiverChannelPointers {
    /// Cursors over a receiver channel of `num_buffers` slots.
    #[must_use]
    pub fn new(num_buffers: usize) -> Self {
        Self {
            wrptr: ChannelBufferPointer::new(num_buffers),
            ack_ptr: ChannelBufferPointer::new(num_buffers),
            completion_ptr: ChannelBufferPointer::new(num_buffers),
        }
    }

    /// Packets sent but not yet completed.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        self.completion_ptr.distance_behind(&self.wrptr)
    }

    /// Whether the peer's receiver channel has a free slot.
    #[must_use]
    pub fn has_space_for_packet(&self) -> bool {
        self.in_flight() < self.wrptr.num_buffers() as u64
    }

    /// Whether some sent packet has not been acknowledged.
    #[must_use]
    pub fn has_unacknowledged_eth_packets(&self) -> bool {
        !self.ack_ptr.is_caught_up_to(&self.wrptr)
    }

    /// Whether some sent packet has not been completed.
    #[must_use]
    pub fn has_incomplete_eth_packets(&self) -> bool {
        !self.completion_ptr.is_caught_up_to(&self.wrptr)
    }
}

/// One local sender channel and its producer connection.
#[derive(Debug)]
pub struct SenderChannel {
    buffer: EthChannelBuffer,
    interface: EdmChannelWorkerInterface,
    counters: Arc<ChannelCounters>,
    recorder: Option<PacketHeaderRecorder>,
}

impl SenderChannel {
    pub(crate) fn new(
        buffer: EthChannelBuffer,
        interface: EdmChannelWorkerInterface,
        counters: Arc<ChannelCounters>,
        recorder: Option<PacketHeaderRecorder>,
    ) -> Self {
        Self {
            buffer,
            interface,
            counters,
            recorder,
        }
    }

    /// Channel id.
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.buffer.id()
    }

    /// Producer connection.
    #[must_use]
    pub const fn interface(&self) -> &EdmChannelWorkerInterface {
        &self.interface
    }

    /// Header capture ring, if enabled.
    #[must_use]
    pub const fn recorder(&self) -> Option<&PacketHeaderRecorder> {
        self.recorder.as_ref()
    }

    /// Counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<ChannelCounters> {
        &self.counters
    }

    /// Run one step; returns whether any work was done.
    pub(crate) fn step<L: EthLink, N: Noc>(
        &mut self,
        io: &EngineIo<'_, L, N>,
        outbound: &mut OutboundReceiverChannelPointers,
        remote_receiver: &EthChannelBuffer,
    ) -> Result<bool> {
        let channel = self.id();
        let mut did_something = false;

        if !self.interface.state().connected && self.interface.poll_connect(io.mem, io.noc)? {
            self.counters.record_connection();
            did_something = true;
        }

        if self.interface.state().connected
            && outbound.has_space_for_packet()
            && !io.link.is_tx_busy()
            && self.interface.has_unsent_payload(io.mem)
        {
            let backpressured = self
                .interface
                .local_rdptr
                .distance_behind(&self.interface.local_wrptr)
                >= self.buffer.num_buffers() as u64;
            if !backpressured {
                self.send_next_data(io, outbound, remote_receiver)?;
                did_something = true;
            }
        }

        // Completions before acks: acks seen are then never fewer than completions.
        let completions = io.regs.read(StreamId::completed(channel));
        if completions > 0 {
            let n = u64::from(completions.unsigned_abs());
            outbound.completion_ptr.increment_n(n);
            self.interface.local_rdptr.increment_n(n);
            io.regs.increment(StreamId::completed(channel), -completions);
            self.counters.record_completions(n);
            did_something = true;
        }

        let acks = io.regs.read(StreamId::acked(channel));
        if acks > 0 {
            let n = u64::from(acks.unsigned_abs());
            outbound.ack_ptr.increment_n(n);
            self.interface.local_ackptr.increment_n(n);
            if self.interface.state().connected {
                self.interface.update_worker_copy_of_read_ptr(io.mem, io.noc)?;
            }
            io.regs.increment(StreamId::acked(channel), -acks);
            did_something = true;
        }

        if self.interface.has_worker_teardown_request(io.mem)
            && self.interface.all_eth_packets_completed()
            && !self.interface.has_unsent_payload(io.mem)
        {
            self.interface.teardown_connection(io.mem, io.noc)?;
            self.counters.record_teardown();
            did_something = true;
        }

        Ok(did_something)
    }

    fn send_next_data<L: EthLink, N: Noc>(
        &mut self,
        io: &EngineIo<'_, L, N>,
        outbound: &mut OutboundReceiverChannelPointers,
        remote_receiver: &EthChannelBuffer,
    ) -> Result<()> {
        let channel = self.id();
        let index = self.interface.local_wrptr.get_buffer_index();
        let header_addr = self.buffer.get_packet_header_address(index);
        let corrupt = |source| EngineError::CorruptHeader {
            channel,
            slot: index,
            source,
        };

        let mut header = PacketHeader::from_bytes(&io.mem.read(header_addr, HEADER_SIZE))
            .map_err(corrupt)?;
        if io.validate_headers {
            header.validate().map_err(corrupt)?;
        }
        let size = header.payload_size_including_header();
        if size > self.buffer.buffer_size() {
            return Err(corrupt(crate::protocol::Error::PayloadTooLarge {
                size,
                max: self.buffer.buffer_size(),
            }));
        }

        header.set_src_ch_id(channel);
        io.mem.write(header_addr + PacketHeader::src_ch_id_offset(), &[channel]);
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(&header);
        }

        let remote_index = outbound.wrptr.get_buffer_index();
        io.link.send_payload(
            header_addr,
            remote_receiver.get_buffer_address(remote_index),
            size,
        );
        let sync = ChannelSync {
            bytes_sent: size as u32,
            receiver_ack: 0,
            src_id: u32::from(channel),
        };
        self.buffer.write_sync(io.mem, index, &sync);
        io.link.send_payload(
            self.buffer.get_sync_address(index),
            remote_receiver.get_sync_address(remote_index),
            CHANNEL_SYNC_SIZE,
        );

        self.interface.local_wrptr.increment();
        io.link.remote_increment(StreamId::ToReceiverPktsSent, 1);
        outbound.wrptr.increment();

        self.counters.record_send(size, outbound.in_flight());
        trace!(
            channel,
            slot = index,
            remote_slot = remote_index,
            size,
            in_flight = outbound.in_flight(),
            "packet sent"
        );
        if outbound.in_flight() == outbound.wrptr.num_buffers() as u64 {
            debug!(channel, "peer receiver channel full");
        }
        Ok(())
    }
}
