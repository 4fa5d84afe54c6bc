//! Packet header and codec errors

use thiserror::Error;

/// Errors raised while decoding or validating a fabric packet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Header checksum does not match its fields
    #[error("header checksum mismatch: expected {expected:#x}, got {found:#x}")]
    ChecksumMismatch {
        /// Checksum computed over the received fields
        expected: u64,
        /// Checksum stored in the header
        found: u64,
    },

    /// Unknown chip send type byte
    #[error("invalid chip send type: {value:#x}")]
    InvalidSendType {
        /// Raw byte
        value: u8,
    },

    /// Unknown command byte
    #[error("invalid command: {value:#x}")]
    InvalidCommand {
        /// Raw byte
        value: u8,
    },

    /// Source channel stamped by the sending engine does not exist
    #[error("invalid source channel: {value}")]
    InvalidSourceChannel {
        /// Raw byte
        value: u8,
    },

    /// Routing flags carry undefined bits
    #[error("invalid routing flags: {flags:#010b}")]
    InvalidRoutingFlags {
        /// Raw flag byte
        flags: u8,
    },

    /// A reserved field was not zero
    #[error("reserved field {field} is non-zero: {value:#x}")]
    ReservedFieldNonZero {
        /// Field name
        field: &'static str,
        /// Value found
        value: u64,
    },

    /// Packet (header included) does not fit a channel slot
    #[error("packet too large: {size} bytes (slot holds {max})")]
    PayloadTooLarge {
        /// Packet size including header
        size: usize,
        /// Slot capacity
        max: usize,
    },

    /// Buffer too small
    #[error("buffer too small: need {needed} bytes, got {got}")]
    BufferTooSmall {
        /// Needed size
        needed: usize,
        /// Actual size
        got: usize,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
