//! The fabric data mover engine and its producer-side adapter.

mod adapter;
mod config;
mod engine;
mod error;
mod receiver;
mod recorder;
mod sender;
mod termination;
mod worker;

pub use adapter::{ConnectError, EdmConnectionArgs, WorkerLocation, WorkerToFabricSender};
pub use config::{
    ConfigError, DEFAULT_CHANNEL_BUFFER_SIZE, DEFAULT_NUM_BUFFERS, DEFAULT_SWITCH_INTERVAL,
    DownstreamArgs, EdmConfig, RecorderRegion, RecorderRegions, RuntimeArgs,
};
pub use engine::{DataMover, EngineState, IdleTask, PERSISTENT_EXIT_SENTINEL};
pub use error::{EngineError, Result};
pub use receiver::{ReceiverChannel, ReceiverChannelPointers};
pub use recorder::PacketHeaderRecorder;
pub use sender::{OutboundReceiverChannelPointers, SenderChannel};
pub use termination::TerminationSignal;
pub use worker::{
    CLAIM_CLOSED, CLAIM_FREE, CLAIM_OPEN, CONNECTION_INFO_SIZE, CONNECTION_LIVE,
    ConnectionState, EdmChannelWorkerInterface, INFO_EDM_RDPTR, TEARDOWN_COMPLETE,
};
