//! Fabric packet type

use bytes::Bytes;

use super::{ChipId, ChipSendType, Command, MulticastRoute, PacketHeader};

/// A sealed header plus its payload
///
/// Packets are immutable once built; forwarding engines edit a copy of the header and
/// reseal it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Bytes,
}

impl Packet {
    /// Write `payload` at `target` on a single chip
    #[must_use]
    pub fn unicast_write(destination: ChipId, target: u64, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        let header = PacketHeader::new(ChipSendType::Unicast, Command::Write, destination)
            .with_target(target)
            .with_payload_size(payload.len() as u32)
            .seal();
        Self { header, payload }
    }

    /// Write `payload` at `target` on every chip along `route`, starting from `destination`
    #[must_use]
    pub fn multicast_write(
        destination: ChipId,
        route: MulticastRoute,
        target: u64,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        let header = PacketHeader::new(ChipSendType::Multicast, Command::Write, destination)
            .with_multicast(route)
            .with_target(target)
            .with_payload_size(payload.len() as u32)
            .seal();
        Self { header, payload }
    }

    /// Header-only semaphore increment
    #[must_use]
    pub fn atomic_inc(
        destination: ChipId,
        target: u64,
        increment: u32,
        wrap_boundary: u32,
    ) -> Self {
        let header = PacketHeader::new(ChipSendType::Unicast, Command::AtomicInc, destination)
            .with_atomic(target, increment, wrap_boundary)
            .seal();
        Self {
            header,
            payload: Bytes::new(),
        }
    }

    /// Write `payload` at `target`, then increment the semaphore at `semaphore`
    #[must_use]
    pub fn write_atomic_inc(
        destination: ChipId,
        target: u64,
        payload: impl Into<Bytes>,
        semaphore: u64,
        increment: u32,
    ) -> Self {
        let payload = payload.into();
        let header =
            PacketHeader::new(ChipSendType::Unicast, Command::WriteAtomicInc, destination)
                .with_target(target)
                .with_atomic(semaphore, increment, 0)
                .with_payload_size(payload.len() as u32)
                .seal();
        Self { header, payload }
    }

    /// Create from header and payload as found in a slot
    #[must_use]
    pub fn from_parts(header: PacketHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get header
    #[must_use]
    pub const fn header(&self) -> &PacketHeader {
        &self.header
    }

    /// Get payload
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Bytes the packet occupies in a slot, rounded up to link words
    #[must_use]
    pub const fn size_including_header(&self) -> usize {
        self.header.payload_size_including_header()
    }

    /// Consume into header and payload
    #[must_use]
    pub fn into_parts(self) -> (PacketHeader, Bytes) {
        (self.header, self.payload)
    }
}
