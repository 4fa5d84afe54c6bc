//! Link, on-chip network and scratch-memory primitives the engine runs on.

mod channel;
mod credit;
mod handshake;
mod link;
mod memory;
mod noc;
mod pointer;

pub use channel::{
    CHANNEL_SYNC_SIZE, ChannelSync, EthChannelBuffer, NUM_SENDER_CHANNELS, RECEIVER_CHANNEL_ID,
};
pub use credit::{CreditCounter, StreamId, StreamRegisters};
pub use handshake::{HANDSHAKE_ACK, HANDSHAKE_READY, HandshakeRole, LinkHandshake};
pub use link::{EthLink, SimEthLink};
pub use memory::L1Memory;
pub use noc::{Noc, NocAddr, NocError, NocXy, SimNoc, SimNocFabric, wrapping_increment};
pub use pointer::ChannelBufferPointer;
