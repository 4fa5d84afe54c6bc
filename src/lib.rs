//! Fabric data mover: a credit-based packet relay across chip-to-chip Ethernet links.
//!
//! Each end of a link runs a [`DataMover`] with two sender channels and one receiver
//! channel. Producers attach to a sender channel through a [`WorkerToFabricSender`],
//! write [`Packet`]s into its slots, and the engine streams them to the peer, which
//! either executes them on its chip or forwards them one hop further.
//!
//! # Quick Start
//!
//! ```rust
//! use fabric_mover::{ChipId, Packet, decode, encode};
//!
//! let packet = Packet::unicast_write(ChipId::new(0, 1), 0x1000, b"hello fabric".to_vec());
//! let bytes = encode(&packet);
//! let decoded = decode(bytes.into())?;
//! assert_eq!(decoded.payload().as_ref(), b"hello fabric");
//! # Ok::<(), fabric_mover::Error>(())
//! ```
//!
//! # Layers
//!
//! - [`protocol`] - the 64-byte packet header, packets, routing decisions and counters
//! - [`transport`] - scratch memory, slot rings, credit registers, the link and the NoC
//! - [`edm`] - the engine loop, producer connections, configuration and termination

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod edm;
pub mod protocol;
pub mod transport;

pub use edm::{
    DataMover, EdmConfig, EngineError, EngineState, RuntimeArgs, TerminationSignal,
    WorkerToFabricSender,
};
pub use protocol::{
    ChipId, Command, Error, LineRouting, Packet, PacketHeader, Result, RoutingPolicy, decode,
    encode,
};
pub use transport::{L1Memory, NocXy, SimEthLink, SimNocFabric, StreamRegisters};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
