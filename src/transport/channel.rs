//! Channel slot addressing and per-slot sync records.

use crate::protocol::HEADER_SIZE;

use super::L1Memory;

/// Bytes appended to each slot for the sync record.
pub const CHANNEL_SYNC_SIZE: usize = 16;

/// Ids 0 and 1 are sender channels.
pub const NUM_SENDER_CHANNELS: usize = 2;

/// Receiver channel id, the next id after the sender channels.
pub const RECEIVER_CHANNEL_ID: u8 = NUM_SENDER_CHANNELS as u8;

/// Fixed-capacity ring of equally sized packet slots at a base address.
///
/// ```text
/// base
///  | slot 0 (buffer_size)           | sync 0 (16) | slot 1 ...
///  | header (64) | payload ...      |             |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EthChannelBuffer {
    id: u8,
    base: usize,
    buffer_size: usize,
    num_buffers: usize,
}

impl EthChannelBuffer {
    /// Describe a channel of `num_buffers` slots of `buffer_size` bytes at `base`.
    #[must_use]
    pub const fn new(id: u8, base: usize, buffer_size: usize, num_buffers: usize) -> Self {
        Self {
            id,
            base,
            buffer_size,
            num_buffers,
        }
    }

    /// Channel id (0, 1 sender; 2 receiver).
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Usable bytes per slot, header included.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Slot count.
    #[must_use]
    pub const fn num_buffers(&self) -> usize {
        self.num_buffers
    }

    /// Distance between consecutive slots.
    #[must_use]
    pub const fn slot_stride(&self) -> usize {
        self.buffer_size + CHANNEL_SYNC_SIZE
    }

    /// Bytes spanned by the whole channel.
    #[must_use]
    pub const fn total_size(&self) -> usize {
        self.slot_stride() * self.num_buffers
    }

    /// First byte of slot `index`.
    #[must_use]
    pub const fn get_buffer_address(&self, index: usize) -> usize {
        debug_assert!(index < self.num_buffers);
        self.base + index * self.slot_stride()
    }

    /// Packet header of slot `index`.
    #[must_use]
    pub const fn get_packet_header_address(&self, index: usize) -> usize {
        self.get_buffer_address(index)
    }

    /// Payload of slot `index`.
    #[must_use]
    pub const fn get_payload_address(&self, index: usize) -> usize {
        self.get_buffer_address(index) + HEADER_SIZE
    }

    /// Sync record of slot `index`.
    #[must_use]
    pub const fn get_sync_address(&self, index: usize) -> usize {
        self.get_buffer_address(index) + self.buffer_size
    }

    /// Reset the sync record of slot `index` once its writes have flushed.
    pub fn clear_sync(&self, mem: &L1Memory, index: usize) {
        mem.fill_zero(self.get_sync_address(index), CHANNEL_SYNC_SIZE);
    }

    /// Read the sync record of slot `index`.
    #[must_use]
    pub fn read_sync(&self, mem: &L1Memory, index: usize) -> ChannelSync {
        let mut bytes = [0u8; CHANNEL_SYNC_SIZE];
        mem.read_into(self.get_sync_address(index), &mut bytes);
        ChannelSync::from_bytes(&bytes)
    }

    /// Write the sync record of slot `index`.
    pub fn write_sync(&self, mem: &L1Memory, index: usize, sync: &ChannelSync) {
        mem.write(self.get_sync_address(index), &sync.to_bytes());
    }
}

/// Per-slot sync record sent after the packet bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelSync {
    /// Bytes moved for the packet in this slot
    pub bytes_sent: u32,
    /// Set by the receiver once the slot has been acknowledged
    pub receiver_ack: u32,
    /// Sender channel that filled the slot
    pub src_id: u32,
}

impl ChannelSync {
    /// Encode (little-endian, last word reserved).
    #[must_use]
    pub fn to_bytes(&self) -> [u8; CHANNEL_SYNC_SIZE] {
        let mut bytes = [0u8; CHANNEL_SYNC_SIZE];
        bytes[0..4].copy_from_slice(&self.bytes_sent.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.receiver_ack.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.src_id.to_le_bytes());
        bytes
    }

    /// Decode (little-endian).
    #[must_use]
    pub fn from_bytes(bytes: &[u8; CHANNEL_SYNC_SIZE]) -> Self {
        let word = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        Self {
            bytes_sent: word(0),
            receiver_ack: word(4),
            src_id: word(8),
        }
    }

    /// Whether the record holds a sent packet.
    #[must_use]
    pub const fn is_set(&self) -> bool {
        self.bytes_sent != 0
    }

    /// Whether the receiver has acknowledged the slot.
    #[must_use]
    pub const fn is_acknowledged(&self) -> bool {
        self.receiver_ack != 0
    }
}
