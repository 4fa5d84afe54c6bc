//! Packet send types, commands, routing flags and forwarding outcomes

use std::fmt;

/// Whether a packet targets one chip or a range of chips
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ChipSendType {
    /// Single destination chip
    Unicast = 0x00,
    /// Destination chip plus the hops covered by the multicast depths
    Multicast = 0x01,
}

impl ChipSendType {
    /// Convert from byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Unicast),
            0x01 => Some(Self::Multicast),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Operation the destination chip performs with the packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Command {
    /// Write the payload to the target offset
    Write = 0x01,
    /// Atomically increment the word at the target offset (header-only packet)
    AtomicInc = 0x02,
    /// Write the payload, then increment the word at the atomic target
    WriteAtomicInc = 0x03,
}

impl Command {
    /// Convert from byte
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Write),
            0x02 => Some(Self::AtomicInc),
            0x03 => Some(Self::WriteAtomicInc),
            _ => None,
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether the command carries a payload that is written at the destination
    #[must_use]
    pub const fn writes_payload(self) -> bool {
        matches!(self, Self::Write | Self::WriteAtomicInc)
    }

    /// Whether the command increments a semaphore at the destination
    #[must_use]
    pub const fn increments(self) -> bool {
        matches!(self, Self::AtomicInc | Self::WriteAtomicInc)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Write => "Write",
            Self::AtomicInc => "AtomicInc",
            Self::WriteAtomicInc => "WriteAtomicInc",
        };
        write!(f, "{name}")
    }
}

/// Routing flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RoutingFlags(u8);

impl RoutingFlags {
    /// Valid flag bits mask
    pub const VALID_MASK: u8 =
        Self::FORWARD | Self::INLINE_FORWARD | Self::MCAST_DATA | Self::MCAST_ACTIVE;
    /// Packet payload travels with the header
    pub const FORWARD: u8 = 1 << 0;
    /// Header-only packet, the operands are inline
    pub const INLINE_FORWARD: u8 = 1 << 1;
    /// Payload is multicast data
    pub const MCAST_DATA: u8 = 1 << 2;
    /// Multicast destination has been reached; every further hop consumes the packet
    pub const MCAST_ACTIVE: u8 = 1 << 3;

    /// Create empty flags
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Create from byte
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        if value & !Self::VALID_MASK == 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Convert to byte
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Set a flag
    #[must_use]
    pub const fn with(mut self, flag: u8) -> Self {
        debug_assert!(flag & !Self::VALID_MASK == 0, "invalid flag bit");
        self.0 |= flag;
        self
    }

    /// Check if flag is set
    #[must_use]
    pub const fn has(self, flag: u8) -> bool {
        (self.0 & flag) != 0
    }

    /// Check if the multicast destination has been reached upstream
    #[must_use]
    pub const fn is_mcast_active(self) -> bool {
        self.has(Self::MCAST_ACTIVE)
    }
}

impl fmt::Display for RoutingFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.has(Self::FORWARD) {
            parts.push("FORWARD");
        }
        if self.has(Self::INLINE_FORWARD) {
            parts.push("INLINE_FORWARD");
        }
        if self.has(Self::MCAST_DATA) {
            parts.push("MCAST_DATA");
        }
        if self.has(Self::MCAST_ACTIVE) {
            parts.push("MCAST_ACTIVE");
        }
        if parts.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", parts.join(" | "))
        }
    }
}

/// Direction of a link relative to the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// North
    North,
    /// South
    South,
    /// East
    East,
    /// West
    West,
}

/// Per-direction multicast hop budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MulticastRoute {
    /// Hops remaining northwards
    pub north: u16,
    /// Hops remaining southwards
    pub south: u16,
    /// Hops remaining eastwards
    pub east: u16,
    /// Hops remaining westwards
    pub west: u16,
}

impl MulticastRoute {
    /// Route reaching `hops` chips in a single direction
    #[must_use]
    pub fn toward(direction: Direction, hops: u16) -> Self {
        let mut route = Self::default();
        *route.depth_mut(direction) = hops;
        route
    }

    /// Remaining depth toward `direction`
    #[must_use]
    pub const fn depth(&self, direction: Direction) -> u16 {
        match direction {
            Direction::North => self.north,
            Direction::South => self.south,
            Direction::East => self.east,
            Direction::West => self.west,
        }
    }

    fn depth_mut(&mut self, direction: Direction) -> &mut u16 {
        match direction {
            Direction::North => &mut self.north,
            Direction::South => &mut self.south,
            Direction::East => &mut self.east,
            Direction::West => &mut self.west,
        }
    }

    /// Consume one hop toward `direction`; saturates at zero
    pub fn decrement(&mut self, direction: Direction) {
        let depth = self.depth_mut(direction);
        *depth = depth.saturating_sub(1);
    }

    /// True when no direction has hops left
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.north == 0 && self.south == 0 && self.east == 0 && self.west == 0
    }
}

/// What the receiver channel does with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ForwardType {
    /// Neither consumed here nor forwarded
    Invalid = 0x0,
    /// Consumed on this chip only
    LocalOnly = 0x1,
    /// Forwarded to the next hop only
    RemoteOnly = 0x2,
    /// Consumed here and forwarded (multicast)
    LocalAndRemote = 0x3,
}

impl ForwardType {
    /// Combine the two routing decisions
    #[must_use]
    pub const fn from_decisions(local: bool, forward: bool) -> Self {
        match ((forward as u8) << 1) | local as u8 {
            0x1 => Self::LocalOnly,
            0x2 => Self::RemoteOnly,
            0x3 => Self::LocalAndRemote,
            _ => Self::Invalid,
        }
    }

    /// Packet must be written on this chip
    #[must_use]
    pub const fn is_local(self) -> bool {
        matches!(self, Self::LocalOnly | Self::LocalAndRemote)
    }

    /// Packet must continue to the downstream hop
    #[must_use]
    pub const fn is_remote(self) -> bool {
        matches!(self, Self::RemoteOnly | Self::LocalAndRemote)
    }
}
