//! Fabric packet header
//!
//! The header is 64 bytes, sits at the start of every channel slot and is sealed with an
//! `XXHash3` checksum over its own fields.

use xxhash_rust::xxh3::xxh3_64;

use super::{
    CHECKSUM_SIZE, ChipId, ChipSendType, Command, Error, HEADER_SIZE, MulticastRoute, Result,
    RoutingFlags, round_up_to_word,
};

const CHECKSUMMED_LEN: usize = HEADER_SIZE - CHECKSUM_SIZE;
const SRC_CH_ID_OFFSET: usize = 7;
const RESERVED_RANGE: std::ops::Range<usize> = 44..56;

/// Fabric packet header (64 bytes)
///
/// # Wire Format
///
/// ```text
///  0       2       4   5   6   7   8       10      12      14      16
/// +-------+-------+---+---+---+---+-------+-------+-------+-------+
/// | mesh  |  dev  |typ|cmd|flg|src| north | south | east  | west  |
/// +-------+-------+---+---+---+---+-------+-------+-------+-------+
/// 16              24                              32
/// +---------------+-------------------------------+
/// | target lo | hi|        atomic target (8)      |
/// +---------------+-------------------------------+
/// 32      36      40      44                      56              64
/// +-------+-------+-------+-----------------------+---------------+
/// |  inc  | wrap  | size  |     reserved (12)     | checksum (8)  |
/// +-------+-------+-------+-----------------------+---------------+
/// ```
///
/// `src` (the source channel id) is stamped by the sender channel in flight and is
/// therefore not covered by the checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    dst_mesh_id: u16,
    dst_dev_id: u16,
    send_type: u8,
    command: u8,
    routing_flags: u8,
    src_ch_id: u8,
    mcast: MulticastRoute,
    target_offset_lo: u32,
    target_offset_hi: u32,
    atomic_target: u64,
    atomic_increment: u32,
    atomic_wrap: u32,
    payload_size: u32,
    reserved: [u8; 12],
    checksum: u64,
}

impl PacketHeader {
    /// Create an unsealed header; call [`PacketHeader::seal`] once all fields are set
    #[must_use]
    pub fn new(send_type: ChipSendType, command: Command, destination: ChipId) -> Self {
        let flags = if command.writes_payload() {
            RoutingFlags::new().with(RoutingFlags::FORWARD)
        } else {
            RoutingFlags::new().with(RoutingFlags::INLINE_FORWARD)
        };
        let flags = match send_type {
            ChipSendType::Multicast => flags.with(RoutingFlags::MCAST_DATA),
            ChipSendType::Unicast => flags,
        };
        Self {
            dst_mesh_id: destination.mesh_id,
            dst_dev_id: destination.device_id,
            send_type: send_type.as_u8(),
            command: command.as_u8(),
            routing_flags: flags.as_u8(),
            src_ch_id: 0,
            mcast: MulticastRoute::default(),
            target_offset_lo: 0,
            target_offset_hi: 0,
            atomic_target: 0,
            atomic_increment: 0,
            atomic_wrap: 0,
            payload_size: 0,
            reserved: [0; 12],
            checksum: 0,
        }
    }

    /// Set the 64-bit write target
    #[must_use]
    pub const fn with_target(mut self, target: u64) -> Self {
        self.target_offset_lo = target as u32;
        self.target_offset_hi = (target >> 32) as u32;
        self
    }

    /// Set the multicast hop budget
    #[must_use]
    pub const fn with_multicast(mut self, route: MulticastRoute) -> Self {
        self.mcast = route;
        self
    }

    /// Set the semaphore increment operands
    #[must_use]
    pub const fn with_atomic(mut self, target: u64, increment: u32, wrap_boundary: u32) -> Self {
        self.atomic_target = target;
        self.atomic_increment = increment;
        self.atomic_wrap = wrap_boundary;
        self
    }

    /// Set the payload length (header excluded)
    #[must_use]
    pub const fn with_payload_size(mut self, payload_size: u32) -> Self {
        self.payload_size = payload_size;
        self
    }

    /// Compute and store the checksum
    #[must_use]
    pub fn seal(mut self) -> Self {
        self.checksum = self.compute_checksum();
        self
    }

    /// Destination chip
    #[must_use]
    pub const fn destination(&self) -> ChipId {
        ChipId {
            mesh_id: self.dst_mesh_id,
            device_id: self.dst_dev_id,
        }
    }

    /// Unicast or multicast
    #[must_use]
    pub fn send_type(&self) -> Option<ChipSendType> {
        ChipSendType::from_u8(self.send_type)
    }

    /// Destination operation
    #[must_use]
    pub fn command(&self) -> Option<Command> {
        Command::from_u8(self.command)
    }

    /// Raw command byte
    #[must_use]
    pub const fn command_byte(&self) -> u8 {
        self.command
    }

    /// Routing flags
    #[must_use]
    pub fn routing_flags(&self) -> RoutingFlags {
        RoutingFlags::from_u8(self.routing_flags).unwrap_or_default()
    }

    /// Mark the multicast destination as reached
    pub fn set_mcast_active(&mut self) {
        self.routing_flags |= RoutingFlags::MCAST_ACTIVE;
    }

    /// Sender channel that transmitted this packet over the link
    #[must_use]
    pub const fn src_ch_id(&self) -> u8 {
        self.src_ch_id
    }

    /// Stamp the sender channel id; not covered by the checksum
    pub fn set_src_ch_id(&mut self, id: u8) {
        self.src_ch_id = id;
    }

    /// Multicast hop budget
    #[must_use]
    pub const fn multicast(&self) -> &MulticastRoute {
        &self.mcast
    }

    /// Mutable multicast hop budget; reseal after editing
    pub fn multicast_mut(&mut self) -> &mut MulticastRoute {
        &mut self.mcast
    }

    /// 64-bit write target
    #[must_use]
    pub const fn target(&self) -> u64 {
        ((self.target_offset_hi as u64) << 32) | self.target_offset_lo as u64
    }

    /// Semaphore target for increment commands
    #[must_use]
    pub const fn atomic_target(&self) -> u64 {
        self.atomic_target
    }

    /// Increment amount
    #[must_use]
    pub const fn atomic_increment(&self) -> u32 {
        self.atomic_increment
    }

    /// Wrap boundary for the increment (0 = no wrap)
    #[must_use]
    pub const fn atomic_wrap(&self) -> u32 {
        self.atomic_wrap
    }

    /// Payload length (header excluded)
    #[must_use]
    pub const fn payload_size(&self) -> usize {
        self.payload_size as usize
    }

    /// Bytes moved over the link for this packet, rounded up to whole words
    #[must_use]
    pub const fn payload_size_including_header(&self) -> usize {
        round_up_to_word(HEADER_SIZE + self.payload_size as usize)
    }

    /// Stored checksum
    #[must_use]
    pub const fn checksum(&self) -> u64 {
        self.checksum
    }

    fn compute_checksum(&self) -> u64 {
        let mut bytes = self.to_bytes();
        bytes[SRC_CH_ID_OFFSET] = 0;
        xxh3_64(&bytes[..CHECKSUMMED_LEN])
    }

    /// Validate header fields and checksum
    pub fn validate(&self) -> Result<()> {
        if ChipSendType::from_u8(self.send_type).is_none() {
            return Err(Error::InvalidSendType {
                value: self.send_type,
            });
        }

        if Command::from_u8(self.command).is_none() {
            return Err(Error::InvalidCommand {
                value: self.command,
            });
        }

        if RoutingFlags::from_u8(self.routing_flags).is_none() {
            return Err(Error::InvalidRoutingFlags {
                flags: self.routing_flags,
            });
        }

        if self.reserved.iter().any(|byte| *byte != 0) {
            return Err(Error::ReservedFieldNonZero {
                field: "header.reserved",
                value: self
                    .reserved
                    .iter()
                    .take(8)
                    .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte)),
            });
        }

        let expected = self.compute_checksum();
        if expected != self.checksum {
            return Err(Error::ChecksumMismatch {
                expected,
                found: self.checksum,
            });
        }

        Ok(())
    }

    /// Checksum and field validity as a predicate
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Convert to bytes (little-endian)
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];

        bytes[0..2].copy_from_slice(&self.dst_mesh_id.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.dst_dev_id.to_le_bytes());
        bytes[4] = self.send_type;
        bytes[5] = self.command;
        bytes[6] = self.routing_flags;
        bytes[SRC_CH_ID_OFFSET] = self.src_ch_id;
        bytes[8..10].copy_from_slice(&self.mcast.north.to_le_bytes());
        bytes[10..12].copy_from_slice(&self.mcast.south.to_le_bytes());
        bytes[12..14].copy_from_slice(&self.mcast.east.to_le_bytes());
        bytes[14..16].copy_from_slice(&self.mcast.west.to_le_bytes());
        bytes[16..20].copy_from_slice(&self.target_offset_lo.to_le_bytes());
        bytes[20..24].copy_from_slice(&self.target_offset_hi.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.atomic_target.to_le_bytes());
        bytes[32..36].copy_from_slice(&self.atomic_increment.to_le_bytes());
        bytes[36..40].copy_from_slice(&self.atomic_wrap.to_le_bytes());
        bytes[40..44].copy_from_slice(&self.payload_size.to_le_bytes());
        bytes[RESERVED_RANGE].copy_from_slice(&self.reserved);
        bytes[56..64].copy_from_slice(&self.checksum.to_le_bytes());

        bytes
    }

    /// Parse from bytes (little-endian) without validating
    ///
    /// Receivers call [`PacketHeader::validate`] separately so that validation can be
    /// switched off on the hot path.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::BufferTooSmall {
                needed: HEADER_SIZE,
                got: bytes.len(),
            });
        }

        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u64_at = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(word)
        };

        let mut reserved = [0u8; 12];
        reserved.copy_from_slice(&bytes[RESERVED_RANGE]);

        Ok(Self {
            dst_mesh_id: u16_at(0),
            dst_dev_id: u16_at(2),
            send_type: bytes[4],
            command: bytes[5],
            routing_flags: bytes[6],
            src_ch_id: bytes[SRC_CH_ID_OFFSET],
            mcast: MulticastRoute {
                north: u16_at(8),
                south: u16_at(10),
                east: u16_at(12),
                west: u16_at(14),
            },
            target_offset_lo: u32_at(16),
            target_offset_hi: u32_at(20),
            atomic_target: u64_at(24),
            atomic_increment: u32_at(32),
            atomic_wrap: u32_at(36),
            payload_size: u32_at(40),
            reserved,
            checksum: u64_at(56),
        })
    }

    /// Byte offset of the source channel id within an encoded header
    #[must_use]
    pub const fn src_ch_id_offset() -> usize {
        SRC_CH_ID_OFFSET
    }
}
