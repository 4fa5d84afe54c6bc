//! Receiver channel step: acknowledge, execute or forward, flush and complete packets
//! arriving over the link.

use std::sync::Arc;

use tracing::trace;

use crate::protocol::{
    self, ChannelCounters, ForwardType, HEADER_SIZE, PacketHeader, RoutingPolicy,
    get_packet_local_forward_type,
};
use crate::transport::{
    ChannelBufferPointer, CreditCounter, EthChannelBuffer, EthLink, NUM_SENDER_CHANNELS, Noc,
    NocAddr, RECEIVER_CHANNEL_ID, StreamId,
};

use super::adapter::WorkerToFabricSender;
use super::engine::EngineIo;
use super::error::{EngineError, Result};
use super::recorder::PacketHeaderRecorder;

/// The four cursors of the receiver channel.
///
/// Always ordered `completion_ptr <= wr_flush_ptr <= wr_sent_ptr <= ack_ptr`.
#[derive(Debug, Clone)]
pub struct ReceiverChannelPointers {
    /// Packets executed or forwarded
    pub wr_sent_ptr: ChannelBufferPointer,
    /// Packets whose writes have landed
    pub wr_flush_ptr: ChannelBufferPointer,
    /// Packets acknowledged to the sender
    pub ack_ptr: ChannelBufferPointer,
    /// Packets completed back to the sender
    pub completion_ptr: ChannelBufferPointer,
}

impl ReceiverChannelPointers {
    /// Cursors over `num_buffers` slots.
    #[must_use]
    pub fn new(num_buffers: usize) -> Self {
        Self {
            wr_sent_ptr: ChannelBufferPointer::new(num_buffers),
            wr_flush_ptr: ChannelBufferPointer::new(num_buffers),
            ack_ptr: ChannelBufferPointer::new(num_buffers),
            completion_ptr: ChannelBufferPointer::new(num_buffers),
        }
    }

    /// Whether every acknowledged packet has been completed.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.completion_ptr.is_caught_up_to(&self.ack_ptr)
    }
}

/// The receiver channel together with its routing and downstream connection.
#[derive(Debug)]
pub struct ReceiverChannel<P, N> {
    buffer: EthChannelBuffer,
    pointers: ReceiverChannelPointers,
    routing: P,
    downstream: Option<WorkerToFabricSender<N>>,
    counters: Arc<ChannelCounters>,
    recorder: Option<PacketHeaderRecorder>,
}

impl<P: RoutingPolicy, N: Noc> ReceiverChannel<P, N> {
    pub(crate) fn new(
        buffer: EthChannelBuffer,
        routing: P,
        downstream: Option<WorkerToFabricSender<N>>,
        counters: Arc<ChannelCounters>,
        recorder: Option<PacketHeaderRecorder>,
    ) -> Self {
        Self {
            pointers: ReceiverChannelPointers::new(buffer.num_buffers()),
            buffer,
            routing,
            downstream,
            counters,
            recorder,
        }
    }

    /// Cursors.
    #[must_use]
    pub const fn pointers(&self) -> &ReceiverChannelPointers {
        &self.pointers
    }

    /// Routing policy.
    #[must_use]
    pub const fn routing(&self) -> &P {
        &self.routing
    }

    /// Downstream connection, if configured.
    #[must_use]
    pub const fn downstream(&self) -> Option<&WorkerToFabricSender<N>> {
        self.downstream.as_ref()
    }

    pub(crate) fn downstream_mut(&mut self) -> Option<&mut WorkerToFabricSender<N>> {
        self.downstream.as_mut()
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
    pub(crate) fn step<L: EthLink>(&mut self, io: &EngineIo<'_, L, N>) -> Result<bool> {
        let mut did_something = false;

        if io.regs.read(StreamId::ToReceiverPktsSent) > 0 && !io.link.is_tx_busy() {
            self.acknowledge(io)?;
            did_something = true;
        }

        if !self.pointers.wr_sent_ptr.is_caught_up_to(&self.pointers.ack_ptr) {
            did_something |= self.process_next(io)?;
        }

        if !self.pointers.wr_flush_ptr.is_caught_up_to(&self.pointers.wr_sent_ptr)
            && io.noc.writes_flushed()
        {
            let index = self.pointers.wr_flush_ptr.get_buffer_index();
            self.buffer.clear_sync(io.mem, index);
            self.pointers.wr_flush_ptr.increment();
            did_something = true;
        }

        if !self.pointers.completion_ptr.is_caught_up_to(&self.pointers.wr_flush_ptr)
            && !io.link.is_tx_busy()
        {
            let index = self.pointers.completion_ptr.get_buffer_index();
            let src = self.src_channel(io, index);
            io.link.remote_increment(StreamId::completed(src), 1);
            self.pointers.completion_ptr.increment();
            trace!(slot = index, src, "packet completed");
            did_something = true;
        }

        Ok(did_something)
    }

    fn src_channel<L: EthLink>(&self, io: &EngineIo<'_, L, N>, index: usize) -> u8 {
        let addr = self.buffer.get_packet_header_address(index) + PacketHeader::src_ch_id_offset();
        let mut src = [0u8; 1];
        io.mem.read_into(addr, &mut src);
        src[0]
    }

    /// Acknowledge the packet at `ack_ptr` to the sender channel that stamped it.
    fn acknowledge<L: EthLink>(&mut self, io: &EngineIo<'_, L, N>) -> Result<()> {
        let index = self.pointers.ack_ptr.get_buffer_index();
        let src = self.src_channel(io, index);
        if usize::from(src) >= NUM_SENDER_CHANNELS {
            return Err(EngineError::CorruptHeader {
                channel: RECEIVER_CHANNEL_ID,
                slot: index,
                source: protocol::Error::InvalidSourceChannel { value: src },
            });
        }
        io.regs.increment(StreamId::ToReceiverPktsSent, -1);

        let mut sync = self.buffer.read_sync(io.mem, index);
        sync.receiver_ack = 1;
        self.buffer.write_sync(io.mem, index, &sync);

        io.link.remote_increment(StreamId::acked(src), 1);
        self.pointers.ack_ptr.increment();
        self.counters.record_receive();
        trace!(slot = index, src, "packet acknowledged");
        Ok(())
    }

    /// Execute or forward the packet at `wr_sent_ptr`; returns false when stalled on the
    /// downstream.
    fn process_next<L: EthLink>(&mut self, io: &EngineIo<'_, L, N>) -> Result<bool> {
        let index = self.pointers.wr_sent_ptr.get_buffer_index();
        let header_addr = self.buffer.get_packet_header_address(index);
        let corrupt = |source| EngineError::CorruptHeader {
            channel: RECEIVER_CHANNEL_ID,
            slot: index,
            source,
        };

        let header = PacketHeader::from_bytes(&io.mem.read(header_addr, HEADER_SIZE))
            .map_err(corrupt)?;
        if io.validate_headers {
            header.validate().map_err(corrupt)?;
        }
        let size = header.payload_size_including_header();
        if size > self.buffer.buffer_size() {
            return Err(corrupt(protocol::Error::PayloadTooLarge {
                size,
                max: self.buffer.buffer_size(),
            }));
        }

        let forward_type = get_packet_local_forward_type(&header, &self.routing);
        if forward_type == ForwardType::Invalid {
            return Err(EngineError::InvalidForward {
                slot: index,
                destination: header.destination(),
            });
        }
        if forward_type.is_remote() {
            let Some(downstream) = self.downstream.as_ref() else {
                return Err(EngineError::NoDownstream {
                    slot: index,
                    destination: header.destination(),
                });
            };
            if !downstream.is_connected() || !downstream.has_space_for_packet() {
                return Ok(false);
            }
        }

        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(&header);
        }
        if forward_type.is_local() {
            self.execute_local(io, &header, index)?;
        }
        if forward_type.is_remote() {
            self.forward(io, &header, index, forward_type.is_local())?;
        }

        self.pointers.wr_sent_ptr.increment();
        trace!(slot = index, ?forward_type, destination = %header.destination(), "packet processed");
        Ok(true)
    }

    fn execute_local<L: EthLink>(
        &self,
        io: &EngineIo<'_, L, N>,
        header: &PacketHeader,
        index: usize,
    ) -> Result<()> {
        let command = header.command().ok_or_else(|| EngineError::CorruptHeader {
            channel: RECEIVER_CHANNEL_ID,
            slot: index,
            source: protocol::Error::InvalidCommand {
                value: header.command_byte(),
            },
        })?;
        if command.writes_payload() {
            let payload = io
                .mem
                .read(self.buffer.get_payload_address(index), header.payload_size());
            io.noc.write(NocAddr::from_u64(header.target()), &payload)?;
        }
        if command.increments() {
            io.noc.atomic_inc(
                NocAddr::from_u64(header.atomic_target()),
                header.atomic_increment(),
                header.atomic_wrap(),
            )?;
        }
        self.counters.record_local_write();
        Ok(())
    }

    fn forward<L: EthLink>(
        &mut self,
        io: &EngineIo<'_, L, N>,
        header: &PacketHeader,
        index: usize,
        consumed_locally: bool,
    ) -> Result<()> {
        let mut next = *header;
        self.routing.prepare_forward(&mut next, consumed_locally);
        next.set_src_ch_id(0);
        let next = next.seal();

        let mut slot = io.mem.read(
            self.buffer.get_buffer_address(index),
            header.payload_size_including_header(),
        );
        slot[..HEADER_SIZE].copy_from_slice(&next.to_bytes());

        if let Some(downstream) = self.downstream.as_mut() {
            downstream.send_slot_bytes(&slot)?;
        }
        self.counters.record_forward();
        Ok(())
    }
}
