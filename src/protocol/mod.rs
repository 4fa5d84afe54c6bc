//! Fabric packet wire format
//!
//! This module provides the packet header, command/send-type enums, the slot codec and
//! the routing classification used by the receiver channel.

mod codec;
mod error;
mod header;
pub(crate) mod metrics;
mod packet;
mod routing;
mod types;

pub use codec::{decode, encode, encode_into};
pub use error::{Error, Result};
pub use header::PacketHeader;
pub use metrics::{ChannelCounters, CountersSnapshot};
pub use packet::Packet;
pub use routing::{ChipId, LineRouting, RoutingPolicy, get_packet_local_forward_type};
pub use types::{ChipSendType, Command, Direction, ForwardType, MulticastRoute, RoutingFlags};

/// Packet header size in bytes (cache-aligned)
pub const HEADER_SIZE: usize = 64;

/// Checksum size in bytes
pub const CHECKSUM_SIZE: usize = 8;

/// Transfer granularity over the link; packet sizes are rounded up to this.
pub const PACKET_WORD_SIZE_BYTES: usize = 16;

/// Shift converting bytes into link words.
pub const BYTES_TO_WORDS_SHIFT: usize = 4;

/// Round a byte count up to whole link words, in bytes.
#[must_use]
pub const fn round_up_to_word(bytes: usize) -> usize {
    (bytes + PACKET_WORD_SIZE_BYTES - 1) & !(PACKET_WORD_SIZE_BYTES - 1)
}
