//! Stream registers carrying credits across the link.
//!
//! Each engine owns five signed counters. The remote side adds to them through the link;
//! the owner reads them, acts on the delta, then subtracts what it consumed.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

/// Identifies one of the five credit counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StreamId {
    /// Packets the remote sender pushed into our receiver channel
    ToReceiverPktsSent = 0,
    /// Acks for our sender channel 0
    ToSender0PktsAcked = 1,
    /// Acks for our sender channel 1
    ToSender1PktsAcked = 2,
    /// Completions for our sender channel 0
    ToSender0PktsCompleted = 3,
    /// Completions for our sender channel 1
    ToSender1PktsCompleted = 4,
}

impl StreamId {
    /// All counters in register order
    pub const ALL: [Self; 5] = [
        Self::ToReceiverPktsSent,
        Self::ToSender0PktsAcked,
        Self::ToSender1PktsAcked,
        Self::ToSender0PktsCompleted,
        Self::ToSender1PktsCompleted,
    ];

    /// Ack counter for sender channel `channel`
    #[must_use]
    pub const fn acked(channel: u8) -> Self {
        if channel == 0 {
            Self::ToSender0PktsAcked
        } else {
            Self::ToSender1PktsAcked
        }
    }

    /// Completion counter for sender channel `channel`
    #[must_use]
    pub const fn completed(channel: u8) -> Self {
        if channel == 0 {
            Self::ToSender0PktsCompleted
        } else {
            Self::ToSender1PktsCompleted
        }
    }

    /// Register index
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ToReceiverPktsSent => "to_receiver_pkts_sent",
            Self::ToSender0PktsAcked => "to_sender_0_pkts_acked",
            Self::ToSender1PktsAcked => "to_sender_1_pkts_acked",
            Self::ToSender0PktsCompleted => "to_sender_0_pkts_completed",
            Self::ToSender1PktsCompleted => "to_sender_1_pkts_completed",
        };
        write!(f, "{name}")
    }
}

/// Atomic counter readable locally and incrementable from either side of the link.
pub trait CreditCounter {
    /// Current value
    fn read(&self, stream: StreamId) -> i32;

    /// Add `delta` (negative to consume)
    fn increment(&self, stream: StreamId, delta: i32);

    /// Reset to `value`
    fn init(&self, stream: StreamId, value: i32);
}

/// The five credit counters of one engine.
#[derive(Debug, Clone, Default)]
pub struct StreamRegisters {
    regs: Arc<[AtomicI32; 5]>,
}

impl StreamRegisters {
    /// Zeroed registers
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether every counter is zero
    #[must_use]
    pub fn all_zero(&self) -> bool {
        StreamId::ALL.iter().all(|id| self.read(*id) == 0)
    }
}

impl CreditCounter for StreamRegisters {
    fn read(&self, stream: StreamId) -> i32 {
        self.regs[stream.index()].load(Ordering::Acquire)
    }

    fn increment(&self, stream: StreamId, delta: i32) {
        self.regs[stream.index()].fetch_add(delta, Ordering::AcqRel);
    }

    fn init(&self, stream: StreamId, value: i32) {
        self.regs[stream.index()].store(value, Ordering::Release);
    }
}
