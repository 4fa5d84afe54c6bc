use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Per-channel fabric counters, owned by one engine.
///
/// Counting is a no-op unless enabled; engines share the counters with the host through
/// an `Arc` and read them with [`ChannelCounters::snapshot`].
#[derive(Debug, Default)]
pub struct ChannelCounters {
    enabled: AtomicBool,
    connections: AtomicU64,
    teardowns: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    packets_received: AtomicU64,
    local_writes: AtomicU64,
    forwards: AtomicU64,
    completions: AtomicU64,
    max_in_flight: AtomicU64,
}

impl ChannelCounters {
    /// Create counters, recording only if `enabled`
    #[must_use]
    pub fn new(enabled: bool) -> Self {
        let counters = Self::default();
        counters.enabled.store(enabled, Ordering::Relaxed);
        counters
    }

    /// Whether recording is on
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    #[inline]
    fn bump(&self, counter: &AtomicU64, delta: u64) {
        if self.is_enabled() {
            counter.fetch_add(delta, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_connection(&self) {
        self.bump(&self.connections, 1);
    }

    #[inline]
    pub(crate) fn record_teardown(&self) {
        self.bump(&self.teardowns, 1);
    }

    #[inline]
    pub(crate) fn record_send(&self, bytes: usize, in_flight: u64) {
        self.bump(&self.packets_sent, 1);
        self.bump(&self.bytes_sent, bytes as u64);
        if self.is_enabled() {
            update_max(&self.max_in_flight, in_flight);
        }
    }

    #[inline]
    pub(crate) fn record_receive(&self) {
        self.bump(&self.packets_received, 1);
    }

    #[inline]
    pub(crate) fn record_local_write(&self) {
        self.bump(&self.local_writes, 1);
    }

    #[inline]
    pub(crate) fn record_forward(&self) {
        self.bump(&self.forwards, 1);
    }

    #[inline]
    pub(crate) fn record_completions(&self, count: u64) {
        self.bump(&self.completions, count);
    }

    /// Read all counters
    #[must_use]
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            connections: self.connections.load(Ordering::Relaxed),
            teardowns: self.teardowns.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            local_writes: self.local_writes.load(Ordering::Relaxed),
            forwards: self.forwards.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            max_in_flight: self.max_in_flight.load(Ordering::Relaxed),
        }
    }
}

fn update_max(target: &AtomicU64, candidate: u64) {
    let mut current = target.load(Ordering::Relaxed);
    while candidate > current {
        match target.compare_exchange_weak(
            current,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return,
            Err(old) => current = old,
        }
    }
}

/// Point-in-time copy of [`ChannelCounters`].
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CountersSnapshot {
    /// Producer connections observed
    pub connections: u64,
    /// Producer connections torn down
    pub teardowns: u64,
    /// Packets sent over the link
    pub packets_sent: u64,
    /// Bytes sent over the link, headers included
    pub bytes_sent: u64,
    /// Packets acknowledged by the receiver channel
    pub packets_received: u64,
    /// Packets executed on this chip
    pub local_writes: u64,
    /// Packets forwarded downstream
    pub forwards: u64,
    /// Completions returned by the peer
    pub completions: u64,
    /// Highest number of unacknowledged-or-incomplete packets seen after a send
    pub max_in_flight: u64,
}

impl CountersSnapshot {
    /// Average bytes per sent packet.
    #[must_use]
    pub fn avg_packet_bytes(&self) -> Option<u64> {
        if self.packets_sent == 0 {
            return None;
        }
        Some(self.bytes_sent / self.packets_sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_counters_stay_zero() {
        let counters = ChannelCounters::new(false);
        counters.record_send(320, 1);
        counters.record_connection();
        assert_eq!(counters.snapshot(), CountersSnapshot::default());
    }

    #[test]
    fn send_tracks_high_watermark() {
        let counters = ChannelCounters::new(true);
        counters.record_send(320, 3);
        counters.record_send(320, 8);
        counters.record_send(64, 2);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.packets_sent, 3);
        assert_eq!(snapshot.bytes_sent, 704);
        assert_eq!(snapshot.max_in_flight, 8);
        assert_eq!(snapshot.avg_packet_bytes(), Some(234));
    }
}
