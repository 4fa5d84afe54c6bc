//! Fatal engine errors.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{self, ChipId};
use crate::transport::NocError;

use super::adapter::ConnectError;
use super::config::ConfigError;

/// Conditions that halt the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A packet header failed validation
    #[error("corrupt header in channel {channel} slot {slot}: {source}")]
    CorruptHeader {
        /// Channel the packet sat in
        channel: u8,
        /// Slot index
        slot: usize,
        /// Validation failure
        source: protocol::Error,
    },

    /// Routing neither consumes nor forwards the packet
    #[error("packet for {destination} in slot {slot} is neither local nor forwardable")]
    InvalidForward {
        /// Receiver slot index
        slot: usize,
        /// Header destination
        destination: ChipId,
    },

    /// A packet needs forwarding but the engine has no downstream connection
    #[error("packet for {destination} in slot {slot} needs forwarding but no downstream is configured")]
    NoDownstream {
        /// Receiver slot index
        slot: usize,
        /// Header destination
        destination: ChipId,
    },

    /// The link handshake did not finish in time
    #[error("link handshake timed out after {waited:?}")]
    HandshakeTimeout {
        /// Time spent waiting
        waited: Duration,
    },

    /// Configuration rejected at startup
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// NoC access failed
    #[error("noc error: {0}")]
    Noc(#[from] NocError),

    /// Downstream connection failed
    #[error("downstream connection: {0}")]
    Downstream(#[from] ConnectError),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, EngineError>;
