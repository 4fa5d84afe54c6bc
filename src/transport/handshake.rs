//! Two-sided ready exchange run once per link at startup.
//!
//! The sender side writes [`HANDSHAKE_READY`] into the peer's handshake word until the
//! peer answers with [`HANDSHAKE_ACK`] in ours. Resending is harmless, so the exchange
//! survives the peer zeroing its word during its own startup.

use tracing::debug;

use super::{EthLink, L1Memory};

/// Written by the handshake sender into the receiver's handshake word.
pub const HANDSHAKE_READY: u32 = 0xF0E1_D2C3;

/// Written by the handshake receiver into the sender's handshake word.
pub const HANDSHAKE_ACK: u32 = 0xC3D2_E1F0;

/// Which side of the exchange this engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HandshakeRole {
    /// Initiates the exchange
    Sender,
    /// Answers the exchange
    Receiver,
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Ready,
    AwaitingPeer,
    Complete,
}

/// Link handshake state machine.
#[derive(Debug, Clone)]
pub struct LinkHandshake {
    role: HandshakeRole,
    addr: usize,
    stage: Stage,
}

impl LinkHandshake {
    /// Handshake using the word at `addr` in both engines' memory.
    #[must_use]
    pub const fn new(role: HandshakeRole, addr: usize) -> Self {
        Self {
            role,
            addr,
            stage: Stage::Ready,
        }
    }

    /// Role played by this side.
    #[must_use]
    pub const fn role(&self) -> HandshakeRole {
        self.role
    }

    /// Whether the exchange has finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stage == Stage::Complete
    }

    /// Clear the local handshake word and open the exchange.
    pub fn start(&mut self, mem: &L1Memory, link: &impl EthLink) {
        mem.write_u32(self.addr, 0);
        if self.role == HandshakeRole::Sender && !link.is_tx_busy() {
            link.send_word(self.addr, HANDSHAKE_READY);
        }
        self.stage = Stage::AwaitingPeer;
        debug!(role = ?self.role, addr = self.addr, "handshake started");
    }

    /// Make one non-blocking step; returns true once complete.
    pub fn poll(&mut self, mem: &L1Memory, link: &impl EthLink) -> bool {
        match self.stage {
            Stage::Ready => {
                self.start(mem, link);
                false
            }
            Stage::AwaitingPeer => {
                let word = mem.read_u32(self.addr);
                match self.role {
                    HandshakeRole::Sender => {
                        if word == HANDSHAKE_ACK {
                            self.complete();
                        } else if !link.is_tx_busy() {
                            link.send_word(self.addr, HANDSHAKE_READY);
                        }
                    }
                    HandshakeRole::Receiver => {
                        if word == HANDSHAKE_READY && !link.is_tx_busy() {
                            link.send_word(self.addr, HANDSHAKE_ACK);
                            self.complete();
                        }
                    }
                }
                self.is_complete()
            }
            Stage::Complete => true,
        }
    }

    fn complete(&mut self) {
        self.stage = Stage::Complete;
        debug!(role = ?self.role, "handshake complete");
    }
}
