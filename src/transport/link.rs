//! Chip-to-chip link.
//!
//! The link is lossless and in order once a send has been accepted. Callers check
//! [`EthLink::is_tx_busy`] before every transmit.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use tracing::trace;

use super::{CreditCounter, L1Memory, StreamId, StreamRegisters};

/// One engine's end of the link.
pub trait EthLink {
    /// Whether the transmit queue is still draining a previous send.
    fn is_tx_busy(&self) -> bool;

    /// Copy `len` bytes from local memory at `src` into the peer's memory at `dst`.
    fn send_payload(&self, src: usize, dst: usize, len: usize);

    /// Write one word into the peer's memory at `dst`.
    fn send_word(&self, dst: usize, value: u32);

    /// Add `delta` to one of the peer's stream registers.
    fn remote_increment(&self, stream: StreamId, delta: i32);
}

#[derive(Debug)]
struct Endpoint {
    mem: L1Memory,
    regs: StreamRegisters,
}

/// In-process link between two engines.
///
/// Transfers land immediately; after each payload send the transmit queue reports busy
/// for `tx_latency` polls, which is enough to exercise the engines' busy checks.
#[derive(Debug, Clone)]
pub struct SimEthLink {
    local: Arc<Endpoint>,
    remote: Arc<Endpoint>,
    tx_latency: u32,
    busy_polls: Arc<AtomicU32>,
    bytes_sent: Arc<AtomicU64>,
}

impl SimEthLink {
    /// Connect two engines' memories and registers, returning each side's end.
    #[must_use]
    pub fn pair(
        a: (L1Memory, StreamRegisters),
        b: (L1Memory, StreamRegisters),
        tx_latency: u32,
    ) -> (Self, Self) {
        let a = Arc::new(Endpoint { mem: a.0, regs: a.1 });
        let b = Arc::new(Endpoint { mem: b.0, regs: b.1 });
        let end = |local: &Arc<Endpoint>, remote: &Arc<Endpoint>| Self {
            local: Arc::clone(local),
            remote: Arc::clone(remote),
            tx_latency,
            busy_polls: Arc::new(AtomicU32::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
        };
        (end(&a, &b), end(&b, &a))
    }

    /// Total payload bytes pushed through this end.
    #[must_use]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

impl EthLink for SimEthLink {
    fn is_tx_busy(&self) -> bool {
        self.busy_polls
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |polls| {
                polls.checked_sub(1)
            })
            .is_ok()
    }

    fn send_payload(&self, src: usize, dst: usize, len: usize) {
        trace!(src, dst, len, "link send");
        self.local.mem.copy_to(src, &self.remote.mem, dst, len);
        self.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        self.busy_polls.store(self.tx_latency, Ordering::Release);
    }

    fn send_word(&self, dst: usize, value: u32) {
        self.remote.mem.write_u32(dst, value);
    }

    fn remote_increment(&self, stream: StreamId, delta: i32) {
        trace!(%stream, delta, "remote credit");
        self.remote.regs.increment(stream, delta);
    }
}
