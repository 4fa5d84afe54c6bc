//! Receiver-side routing classification
//!
//! Whether a packet is consumed on this chip, continues to the next hop, or both is a
//! pure function of the header and the chip's identity. The identity and topology are
//! supplied through [`RoutingPolicy`] so the engine stays agnostic of mesh layout.

use std::fmt;

use super::{ChipSendType, Direction, ForwardType, PacketHeader};

/// Chip identity within the fabric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChipId {
    /// Mesh the chip belongs to
    pub mesh_id: u16,
    /// Device id within the mesh
    pub device_id: u16,
}

impl ChipId {
    /// Create a chip id
    #[must_use]
    pub const fn new(mesh_id: u16, device_id: u16) -> Self {
        Self { mesh_id, device_id }
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}D{}", self.mesh_id, self.device_id)
    }
}

/// Routing decisions for packets arriving on a receiver channel
pub trait RoutingPolicy {
    /// Whether the packet is written on this chip
    fn must_consume_locally(&self, header: &PacketHeader) -> bool;

    /// Whether the packet continues to the downstream hop
    fn must_forward(&self, header: &PacketHeader) -> bool;

    /// Rewrite the header for the next hop; the caller reseals it
    fn prepare_forward(&self, header: &mut PacketHeader, consumed_locally: bool);
}

/// Classify a packet; calling it twice on the same header gives the same answer
#[must_use]
pub fn get_packet_local_forward_type<P: RoutingPolicy + ?Sized>(
    header: &PacketHeader,
    policy: &P,
) -> ForwardType {
    ForwardType::from_decisions(
        policy.must_consume_locally(header),
        policy.must_forward(header),
    )
}

/// Policy for a chip on a line of chips, with the downstream hop in one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LineRouting {
    chip: ChipId,
    downstream: Direction,
}

impl LineRouting {
    /// Create a policy for `chip` forwarding toward `downstream`
    #[must_use]
    pub const fn new(chip: ChipId, downstream: Direction) -> Self {
        Self { chip, downstream }
    }

    /// This chip
    #[must_use]
    pub const fn chip(&self) -> ChipId {
        self.chip
    }

    /// Direction of the next hop
    #[must_use]
    pub const fn downstream(&self) -> Direction {
        self.downstream
    }

    fn is_destination(&self, header: &PacketHeader) -> bool {
        header.destination() == self.chip
    }
}

impl RoutingPolicy for LineRouting {
    fn must_consume_locally(&self, header: &PacketHeader) -> bool {
        match header.send_type() {
            Some(ChipSendType::Unicast) => self.is_destination(header),
            Some(ChipSendType::Multicast) => {
                self.is_destination(header) || header.routing_flags().is_mcast_active()
            }
            None => false,
        }
    }

    fn must_forward(&self, header: &PacketHeader) -> bool {
        match header.send_type() {
            Some(ChipSendType::Unicast) => !self.is_destination(header),
            Some(ChipSendType::Multicast) => header.multicast().depth(self.downstream) > 0,
            None => false,
        }
    }

    fn prepare_forward(&self, header: &mut PacketHeader, consumed_locally: bool) {
        if header.send_type() != Some(ChipSendType::Multicast) {
            return;
        }
        header.multicast_mut().decrement(self.downstream);
        if consumed_locally {
            header.set_mcast_active();
        }
    }
}
