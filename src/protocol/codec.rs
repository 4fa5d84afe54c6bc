//! Slot codec (encode/decode)
//!
//! A packet occupies the front of a channel slot as `[HEADER (64)] [PAYLOAD] [PADDING]`,
//! padded to whole link words. The header checksum is the only integrity check; the link
//! is lossless so payloads are not checksummed.

use bytes::Bytes;

use super::{Error, HEADER_SIZE, Packet, PacketHeader, Result};

/// Encode a packet into its on-slot form, padded to link words
#[must_use]
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut bytes = vec![0u8; packet.size_including_header()];
    write_parts(packet, &mut bytes);
    bytes
}

/// Encode a packet into `slot`, returning the bytes used
///
/// # Errors
///
/// Returns [`Error::PayloadTooLarge`] when the packet (header and padding included) does
/// not fit the slot.
pub fn encode_into(packet: &Packet, slot: &mut [u8]) -> Result<usize> {
    let size = packet.size_including_header();
    if size > slot.len() {
        return Err(Error::PayloadTooLarge {
            size,
            max: slot.len(),
        });
    }

    write_parts(packet, &mut slot[..size]);
    Ok(size)
}

fn write_parts(packet: &Packet, out: &mut [u8]) {
    let payload = packet.payload();
    out[..HEADER_SIZE].copy_from_slice(&packet.header().to_bytes());
    out[HEADER_SIZE..HEADER_SIZE + payload.len()].copy_from_slice(payload);
    out[HEADER_SIZE + payload.len()..].fill(0);
}

/// Decode and validate a packet from slot bytes
///
/// # Errors
///
/// Returns an error if:
/// - Buffer is too small for the header or the advertised payload
/// - A header field is unknown
/// - Checksum doesn't match
pub fn decode(bytes: Bytes) -> Result<Packet> {
    let header = PacketHeader::from_bytes(&bytes)?;
    header.validate()?;

    let end = HEADER_SIZE + header.payload_size();
    if bytes.len() < end {
        return Err(Error::BufferTooSmall {
            needed: end,
            got: bytes.len(),
        });
    }

    let payload = bytes.slice(HEADER_SIZE..end);
    Ok(Packet::from_parts(header, payload))
}
