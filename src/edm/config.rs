//! Static and runtime engine configuration.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{HEADER_SIZE, PACKET_WORD_SIZE_BYTES};
use crate::transport::{
    EthChannelBuffer, HandshakeRole, NUM_SENDER_CHANNELS, NocXy, RECEIVER_CHANNEL_ID,
};

use super::adapter::{EdmConnectionArgs, WorkerLocation};
use super::worker::CONNECTION_INFO_SIZE;

/// Default slot size (header included).
pub const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 4096;

/// Default slot count per channel.
pub const DEFAULT_NUM_BUFFERS: usize = 8;

/// Default number of idle iterations before the idle task runs.
pub const DEFAULT_SWITCH_INTERVAL: u32 = 256;

const HANDSHAKE_ADDRESS: usize = 0x00;
const TERMINATION_SIGNAL_ADDRESS: usize = 0x20;
const CONNECTION_INFO_BASE: usize = 0x40;
const SEMAPHORE_BASE: usize = 0x80;
const CHANNELS_BASE: usize = 0x100;

/// Configuration errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A channel has no slots
    #[error("{channel} channel has no slots")]
    NoSlots {
        /// Channel name
        channel: &'static str,
    },

    /// Slot cannot hold a header or is not a whole number of link words
    #[error("slot size {size} must be at least {min} and a multiple of {word}")]
    BadSlotSize {
        /// Configured size
        size: usize,
        /// Header size
        min: usize,
        /// Link word size
        word: usize,
    },

    /// Address not aligned for its use
    #[error("{what} at {addr:#x} is not {align}-byte aligned")]
    Misaligned {
        /// Region name
        what: &'static str,
        /// Address
        addr: usize,
        /// Required alignment
        align: usize,
    },

    /// Two regions share bytes
    #[error("{first} overlaps {second}")]
    Overlap {
        /// First region
        first: &'static str,
        /// Second region
        second: &'static str,
    },

    /// Region runs past the end of scratch memory
    #[error("{what} ends at {end:#x}, past memory size {size:#x}")]
    OutOfBounds {
        /// Region name
        what: &'static str,
        /// End address
        end: usize,
        /// Memory size
        size: usize,
    },
}

/// One header-capture ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecorderRegion {
    /// Base address of the ring
    pub address: usize,
    /// Capacity in headers
    pub size_headers: usize,
}

impl RecorderRegion {
    const fn span(&self) -> usize {
        self.size_headers * HEADER_SIZE
    }
}

/// Header-capture rings for the receiver and both sender channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecorderRegions {
    /// Receiver channel ring
    pub receiver: RecorderRegion,
    /// Sender channel rings
    pub senders: [RecorderRegion; NUM_SENDER_CHANNELS],
}

/// Static engine configuration.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EdmConfig {
    /// Slot size in bytes, header included.
    pub channel_buffer_size: usize,
    /// Slots per sender channel.
    pub sender_num_buffers: usize,
    /// Slots in the receiver channel.
    pub receiver_num_buffers: usize,
    /// Base of each local sender channel.
    pub local_sender_channel_address: [usize; NUM_SENDER_CHANNELS],
    /// Connection-info record of each local sender channel.
    pub local_sender_connection_info_address: [usize; NUM_SENDER_CHANNELS],
    /// Base of the local receiver channel.
    pub local_receiver_channel_address: usize,
    /// Base of the peer's receiver channel.
    pub remote_receiver_channel_address: usize,
    /// Base of each of the peer's sender channels.
    pub remote_sender_channel_address: [usize; NUM_SENDER_CHANNELS],
    /// Handshake word, same offset on both sides.
    pub handshake_address: usize,
    /// Side this engine plays in the handshake.
    pub handshake_role: HandshakeRole,
    /// Word polled for termination requests.
    pub termination_signal_address: usize,
    /// Zero semaphores at start and stamp them on exit.
    pub persistent_mode: bool,
    /// Record per-channel counters.
    pub enable_fabric_counters: bool,
    /// Capture processed headers.
    pub recorder: Option<RecorderRegions>,
    /// Idle iterations before the idle task runs.
    pub switch_interval: u32,
    /// Check header checksums before acting on a packet.
    pub validate_headers: bool,
    /// Give up on the handshake after this long.
    pub handshake_timeout: Option<Duration>,
}

impl Default for EdmConfig {
    fn default() -> Self {
        Self::with_layout(
            DEFAULT_CHANNEL_BUFFER_SIZE,
            DEFAULT_NUM_BUFFERS,
            DEFAULT_NUM_BUFFERS,
        )
    }
}

impl EdmConfig {
    /// Lay out a non-overlapping address map, identical on both sides of the link.
    #[must_use]
    pub fn with_layout(
        channel_buffer_size: usize,
        sender_num_buffers: usize,
        receiver_num_buffers: usize,
    ) -> Self {
        let sender_span =
            EthChannelBuffer::new(0, 0, channel_buffer_size, sender_num_buffers).total_size();
        let sender_channels = [CHANNELS_BASE, CHANNELS_BASE + sender_span];
        let receiver = CHANNELS_BASE + 2 * sender_span;

        Self {
            channel_buffer_size,
            sender_num_buffers,
            receiver_num_buffers,
            local_sender_channel_address: sender_channels,
            local_sender_connection_info_address: [
                CONNECTION_INFO_BASE,
                CONNECTION_INFO_BASE + CONNECTION_INFO_SIZE,
            ],
            local_receiver_channel_address: receiver,
            remote_receiver_channel_address: receiver,
            remote_sender_channel_address: sender_channels,
            handshake_address: HANDSHAKE_ADDRESS,
            handshake_role: HandshakeRole::Sender,
            termination_signal_address: TERMINATION_SIGNAL_ADDRESS,
            persistent_mode: false,
            enable_fabric_counters: false,
            recorder: None,
            switch_interval: DEFAULT_SWITCH_INTERVAL,
            validate_headers: cfg!(debug_assertions),
            handshake_timeout: None,
        }
    }

    /// Set the handshake role.
    #[must_use]
    pub fn handshake_role(mut self, role: HandshakeRole) -> Self {
        self.handshake_role = role;
        self
    }

    /// Append header-capture rings of `size_headers` entries after the channels.
    #[must_use]
    pub fn with_recorder(mut self, size_headers: usize) -> Self {
        let base = self.channels_end();
        let span = size_headers * HEADER_SIZE;
        let region = |index: usize| RecorderRegion {
            address: base + index * span,
            size_headers,
        };
        self.recorder = Some(RecorderRegions {
            receiver: region(0),
            senders: [region(1), region(2)],
        });
        self
    }

    /// Local sender channel `channel`.
    #[must_use]
    pub fn sender_channel(&self, channel: u8) -> EthChannelBuffer {
        EthChannelBuffer::new(
            channel,
            self.local_sender_channel_address[usize::from(channel)],
            self.channel_buffer_size,
            self.sender_num_buffers,
        )
    }

    /// Peer's sender channel `channel`.
    #[must_use]
    pub fn remote_sender_channel(&self, channel: u8) -> EthChannelBuffer {
        EthChannelBuffer::new(
            channel,
            self.remote_sender_channel_address[usize::from(channel)],
            self.channel_buffer_size,
            self.sender_num_buffers,
        )
    }

    /// Local receiver channel.
    #[must_use]
    pub fn receiver_channel(&self) -> EthChannelBuffer {
        EthChannelBuffer::new(
            RECEIVER_CHANNEL_ID,
            self.local_receiver_channel_address,
            self.channel_buffer_size,
            self.receiver_num_buffers,
        )
    }

    /// Peer's receiver channel.
    #[must_use]
    pub fn remote_receiver_channel(&self) -> EthChannelBuffer {
        EthChannelBuffer::new(
            RECEIVER_CHANNEL_ID,
            self.remote_receiver_channel_address,
            self.channel_buffer_size,
            self.receiver_num_buffers,
        )
    }

    fn channels_end(&self) -> usize {
        let receiver = self.receiver_channel();
        let mut end = receiver.get_buffer_address(0) + receiver.total_size();
        for channel in 0..NUM_SENDER_CHANNELS as u8 {
            let sender = self.sender_channel(channel);
            end = end.max(sender.get_buffer_address(0) + sender.total_size());
        }
        end
    }

    /// Smallest scratch memory holding every configured region.
    #[must_use]
    pub fn required_l1_size(&self) -> usize {
        self.regions()
            .iter()
            .map(|(_, start, len)| start + len)
            .max()
            .unwrap_or(0)
    }

    /// How a producer reaches local sender channel `channel` of an engine at `edm_core`.
    #[must_use]
    pub fn sender_connection(
        &self,
        runtime: &RuntimeArgs,
        edm_core: NocXy,
        channel: u8,
    ) -> EdmConnectionArgs {
        let index = usize::from(channel);
        EdmConnectionArgs {
            edm_core,
            channel: self.sender_channel(channel),
            connection_info_address: self.local_sender_connection_info_address[index],
            connection_live_address: runtime.connection_live_semaphore[index],
            packets_written_address: runtime.packets_written_semaphore[index],
            claim_address: runtime.channel_claim[index],
        }
    }

    fn regions(&self) -> Vec<(&'static str, usize, usize)> {
        const SENDER_NAMES: [&str; NUM_SENDER_CHANNELS] = ["sender channel 0", "sender channel 1"];
        const INFO_NAMES: [&str; NUM_SENDER_CHANNELS] =
            ["connection info 0", "connection info 1"];
        const RECORDER_NAMES: [&str; NUM_SENDER_CHANNELS] =
            ["sender recorder 0", "sender recorder 1"];

        let mut regions = vec![
            ("handshake", self.handshake_address, 8),
            ("termination signal", self.termination_signal_address, 4),
            (
                "receiver channel",
                self.local_receiver_channel_address,
                self.receiver_channel().total_size(),
            ),
        ];
        for channel in 0..NUM_SENDER_CHANNELS {
            regions.push((
                SENDER_NAMES[channel],
                self.local_sender_channel_address[channel],
                self.sender_channel(channel as u8).total_size(),
            ));
            regions.push((
                INFO_NAMES[channel],
                self.local_sender_connection_info_address[channel],
                CONNECTION_INFO_SIZE,
            ));
        }
        if let Some(recorder) = &self.recorder {
            let receiver = recorder.receiver;
            regions.push(("receiver recorder", receiver.address, receiver.span()));
            for (channel, region) in recorder.senders.iter().enumerate() {
                regions.push((RECORDER_NAMES[channel], region.address, region.span()));
            }
        }
        regions
    }

    /// Check slot geometry, alignment, overlap and fit into `l1_size` bytes.
    pub fn validate(&self, l1_size: usize) -> Result<(), ConfigError> {
        if self.sender_num_buffers == 0 {
            return Err(ConfigError::NoSlots { channel: "sender" });
        }
        if self.receiver_num_buffers == 0 {
            return Err(ConfigError::NoSlots {
                channel: "receiver",
            });
        }
        if self.channel_buffer_size < HEADER_SIZE
            || self.channel_buffer_size % PACKET_WORD_SIZE_BYTES != 0
        {
            return Err(ConfigError::BadSlotSize {
                size: self.channel_buffer_size,
                min: HEADER_SIZE,
                word: PACKET_WORD_SIZE_BYTES,
            });
        }

        check_regions(&self.regions(), l1_size)
    }
}

/// Alignment, bounds and pairwise overlap of named `(name, start, len)` regions.
fn check_regions(
    regions: &[(&'static str, usize, usize)],
    l1_size: usize,
) -> Result<(), ConfigError> {
    for (what, start, len) in regions {
        let align = if *len >= PACKET_WORD_SIZE_BYTES {
            PACKET_WORD_SIZE_BYTES
        } else {
            4
        };
        if start % align != 0 {
            return Err(ConfigError::Misaligned {
                what: *what,
                addr: *start,
                align,
            });
        }
        if start.saturating_add(*len) > l1_size {
            return Err(ConfigError::OutOfBounds {
                what: *what,
                end: start.saturating_add(*len),
                size: l1_size,
            });
        }
    }

    for (i, (first, a_start, a_len)) in regions.iter().enumerate() {
        for (second, b_start, b_len) in &regions[i + 1..] {
            if *a_start < b_start + b_len && *b_start < a_start + a_len {
                return Err(ConfigError::Overlap {
                    first: *first,
                    second: *second,
                });
            }
        }
    }

    Ok(())
}

/// Where the downstream engine's sender channel is and where this engine receives its
/// flow-control updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DownstreamArgs {
    /// Downstream engine channel
    pub edm: EdmConnectionArgs,
    /// This engine as a producer
    pub local: WorkerLocation,
}

/// Per-launch configuration: semaphores and the optional downstream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RuntimeArgs {
    /// Written 1 by a producer on open and 0 on close
    pub connection_live_semaphore: [usize; NUM_SENDER_CHANNELS],
    /// Incremented by a producer after each packet it writes
    pub packets_written_semaphore: [usize; NUM_SENDER_CHANNELS],
    /// Ownership word claimed by a producer on open and released on teardown
    pub channel_claim: [usize; NUM_SENDER_CHANNELS],
    /// Next hop, if packets may need forwarding
    pub downstream: Option<DownstreamArgs>,
}

impl RuntimeArgs {
    /// Semaphores placed in the region reserved by [`EdmConfig::with_layout`].
    #[must_use]
    pub const fn from_layout() -> Self {
        Self {
            connection_live_semaphore: [SEMAPHORE_BASE, SEMAPHORE_BASE + 4],
            packets_written_semaphore: [SEMAPHORE_BASE + 8, SEMAPHORE_BASE + 12],
            channel_claim: [SEMAPHORE_BASE + 16, SEMAPHORE_BASE + 20],
            downstream: None,
        }
    }

    /// Forwarding semaphores for an engine at `core` using this layout, pointing at the
    /// downstream engine channel `edm`.
    #[must_use]
    pub fn with_downstream(mut self, core: NocXy, edm: EdmConnectionArgs) -> Self {
        self.downstream = Some(DownstreamArgs {
            edm,
            local: WorkerLocation {
                core,
                read_ptr_address: SEMAPHORE_BASE + 24,
                teardown_address: SEMAPHORE_BASE + 28,
            },
        });
        self
    }

    /// Check that every semaphore word fits in `l1_size` bytes and stays clear of each
    /// other and of the regions `config` lays out.
    pub fn validate(&self, config: &EdmConfig, l1_size: usize) -> Result<(), ConfigError> {
        const LIVE_NAMES: [&str; NUM_SENDER_CHANNELS] = ["live flag 0", "live flag 1"];
        const WRITTEN_NAMES: [&str; NUM_SENDER_CHANNELS] =
            ["packets written 0", "packets written 1"];
        const CLAIM_NAMES: [&str; NUM_SENDER_CHANNELS] = ["claim word 0", "claim word 1"];

        let mut regions = config.regions();
        for channel in 0..NUM_SENDER_CHANNELS {
            regions.push((LIVE_NAMES[channel], self.connection_live_semaphore[channel], 4));
            regions.push((WRITTEN_NAMES[channel], self.packets_written_semaphore[channel], 4));
            regions.push((CLAIM_NAMES[channel], self.channel_claim[channel], 4));
        }
        if let Some(downstream) = &self.downstream {
            regions.push(("downstream read pointer", downstream.local.read_ptr_address, 4));
            regions.push(("downstream teardown", downstream.local.teardown_address, 4));
        }
        check_regions(&regions, l1_size)
    }

    /// Every semaphore word the engine owns.
    pub(crate) fn semaphores(&self) -> impl Iterator<Item = usize> + '_ {
        self.connection_live_semaphore
            .iter()
            .chain(&self.packets_written_semaphore)
            .chain(&self.channel_claim)
            .copied()
    }
}

impl Default for RuntimeArgs {
    fn default() -> Self {
        Self::from_layout()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_validates() {
        let config = EdmConfig::default();
        let size = config.required_l1_size();
        assert_eq!(config.validate(size), Ok(()));
        assert_eq!(size, 0x100 + 3 * 8 * (4096 + 16));
    }

    #[test]
    fn recorder_regions_follow_channels() {
        let config = EdmConfig::with_layout(256, 4, 4).with_recorder(16);
        let recorder = config.recorder.unwrap();
        assert_eq!(recorder.receiver.address, config.channels_end());
        assert_eq!(config.validate(config.required_l1_size()), Ok(()));
    }

    #[test]
    fn rejects_small_memory() {
        let config = EdmConfig::with_layout(256, 4, 4);
        let result = config.validate(0x200);
        assert!(matches!(result, Err(ConfigError::OutOfBounds { .. })));
    }

    #[test]
    fn rejects_overlap() {
        let mut config = EdmConfig::with_layout(256, 4, 4);
        config.local_receiver_channel_address = config.local_sender_channel_address[1];
        let result = config.validate(1 << 20);
        assert!(matches!(result, Err(ConfigError::Overlap { .. })));
    }

    #[test]
    fn rejects_unaligned_slot() {
        let config = EdmConfig::with_layout(100, 4, 4);
        assert!(matches!(
            config.validate(1 << 20),
            Err(ConfigError::BadSlotSize { size: 100, .. })
        ));
    }

    #[test]
    fn rejects_zero_slots() {
        let config = EdmConfig::with_layout(256, 0, 4);
        assert_eq!(
            config.validate(1 << 20),
            Err(ConfigError::NoSlots { channel: "sender" })
        );
    }

    #[test]
    fn runtime_layout_validates() {
        let config = EdmConfig::with_layout(256, 3, 5);
        let next = config.sender_connection(&RuntimeArgs::default(), NocXy::new(0, 1), 1);
        let runtime = RuntimeArgs::from_layout().with_downstream(NocXy::new(0, 0), next);
        assert_eq!(runtime.validate(&config, config.required_l1_size()), Ok(()));
    }

    #[test]
    fn runtime_rejects_word_past_memory() {
        let config = EdmConfig::with_layout(256, 4, 4);
        let size = config.required_l1_size();
        let mut runtime = RuntimeArgs::from_layout();
        runtime.connection_live_semaphore[0] = size + 0x1000;
        assert_eq!(
            runtime.validate(&config, size),
            Err(ConfigError::OutOfBounds {
                what: "live flag 0",
                end: size + 0x1004,
                size,
            })
        );
    }

    #[test]
    fn runtime_rejects_word_inside_channel() {
        let config = EdmConfig::with_layout(256, 4, 4);
        let mut runtime = RuntimeArgs::from_layout();
        runtime.channel_claim[1] = config.local_sender_channel_address[0] + 0x20;
        assert_eq!(
            runtime.validate(&config, config.required_l1_size()),
            Err(ConfigError::Overlap {
                first: "sender channel 0",
                second: "claim word 1",
            })
        );
    }

    #[test]
    fn runtime_rejects_shared_words() {
        let config = EdmConfig::with_layout(256, 4, 4);
        let mut runtime = RuntimeArgs::from_layout();
        runtime.packets_written_semaphore[0] = runtime.connection_live_semaphore[1];
        assert!(matches!(
            runtime.validate(&config, config.required_l1_size()),
            Err(ConfigError::Overlap { .. })
        ));

        let mut runtime = RuntimeArgs::from_layout();
        runtime.channel_claim[0] += 2;
        assert!(matches!(
            runtime.validate(&config, config.required_l1_size()),
            Err(ConfigError::Misaligned { align: 4, .. })
        ));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn config_json_roundtrip() {
        let config = EdmConfig::with_layout(1024, 4, 8).with_recorder(8);
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EdmConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
