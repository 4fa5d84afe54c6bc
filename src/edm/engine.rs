//! The data mover main loop.
//!
//! One [`DataMover`] runs per end of a link. Each [`DataMover::step`] services one sender
//! channel (alternating between the two) and the receiver channel, does at most one
//! bounded unit of work per check, and never blocks. [`DataMover::run`] loops until a
//! termination request is honoured.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use crate::protocol::{ChannelCounters, CountersSnapshot, PacketHeader, RoutingPolicy};
use crate::transport::{
    CreditCounter, EthChannelBuffer, EthLink, L1Memory, LinkHandshake, NUM_SENDER_CHANNELS, Noc,
    StreamId, StreamRegisters,
};

use super::adapter::{ConnectError, WorkerToFabricSender};
use super::config::{EdmConfig, RuntimeArgs};
use super::error::{EngineError, Result};
use super::receiver::ReceiverChannel;
use super::recorder::PacketHeaderRecorder;
use super::sender::{OutboundReceiverChannelPointers, SenderChannel};
use super::termination::TerminationSignal;
use super::worker::EdmChannelWorkerInterface;

/// Written into every semaphore on exit in persistent mode.
pub const PERSISTENT_EXIT_SENTINEL: u32 = 99;

/// Work run after the engine has been idle for `switch_interval` iterations.
pub trait IdleTask {
    /// Do the work; must return promptly.
    fn run(&mut self);
}

impl<F: FnMut()> IdleTask for F {
    fn run(&mut self) {
        self();
    }
}

/// Lifecycle of a [`DataMover`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineState {
    /// Constructed, [`DataMover::start`] not called yet
    Init,
    /// Waiting for the peer
    Handshaking,
    /// Moving packets
    Running,
    /// Exited on a termination request
    Terminated,
    /// Stopped on a fatal error
    Halted,
}

/// Borrowed view of the engine's ports, handed to the channel steps.
pub(crate) struct EngineIo<'a, L, N> {
    pub(crate) mem: &'a L1Memory,
    pub(crate) regs: &'a StreamRegisters,
    pub(crate) link: &'a L,
    pub(crate) noc: &'a N,
    pub(crate) validate_headers: bool,
}

/// One end of an Ethernet link: two sender channels and one receiver channel.
pub struct DataMover<L, N, P> {
    config: EdmConfig,
    runtime: RuntimeArgs,
    mem: L1Memory,
    regs: StreamRegisters,
    link: L,
    noc: N,
    handshake: LinkHandshake,
    handshake_started: Option<Instant>,
    senders: [SenderChannel; NUM_SENDER_CHANNELS],
    outbound: OutboundReceiverChannelPointers,
    remote_receiver: EthChannelBuffer,
    receiver: ReceiverChannel<P, N>,
    sender_channel_index: usize,
    did_nothing_count: u32,
    idle_task: Option<Box<dyn IdleTask + Send>>,
    state: EngineState,
}

impl<L, N, P> DataMover<L, N, P>
where
    L: EthLink,
    N: Noc + Clone,
    P: RoutingPolicy,
{
    /// Build an engine over `mem`, checking the address map first.
    pub fn new(
        config: EdmConfig,
        runtime: RuntimeArgs,
        mem: L1Memory,
        regs: StreamRegisters,
        link: L,
        noc: N,
        routing: P,
    ) -> Result<Self> {
        config.validate(mem.size())?;
        runtime.validate(&config, mem.size())?;

        let senders = [0u8, 1].map(|channel| {
            let ch = usize::from(channel);
            SenderChannel::new(
                config.sender_channel(channel),
                EdmChannelWorkerInterface::new(
                    channel,
                    config.sender_num_buffers,
                    config.local_sender_connection_info_address[ch],
                    runtime.connection_live_semaphore[ch],
                    runtime.packets_written_semaphore[ch],
                    runtime.channel_claim[ch],
                ),
                Arc::new(ChannelCounters::new(config.enable_fabric_counters)),
                config
                    .recorder
                    .map(|regions| PacketHeaderRecorder::new(mem.clone(), regions.senders[ch])),
            )
        });

        let downstream = runtime
            .downstream
            .map(|args| WorkerToFabricSender::new(noc.clone(), mem.clone(), args.edm, args.local));
        let receiver = ReceiverChannel::new(
            config.receiver_channel(),
            routing,
            downstream,
            Arc::new(ChannelCounters::new(config.enable_fabric_counters)),
            config
                .recorder
                .map(|regions| PacketHeaderRecorder::new(mem.clone(), regions.receiver)),
        );

        Ok(Self {
            handshake: LinkHandshake::new(config.handshake_role, config.handshake_address),
            handshake_started: None,
            senders,
            outbound: OutboundReceiverChannelPointers::new(config.receiver_num_buffers),
            remote_receiver: config.remote_receiver_channel(),
            receiver,
            sender_channel_index: 0,
            did_nothing_count: 0,
            idle_task: None,
            state: EngineState::Init,
            config,
            runtime,
            mem,
            regs,
            link,
            noc,
        })
    }

    /// Run `task` whenever the engine has been idle for `switch_interval` iterations.
    #[must_use]
    pub fn with_idle_task(mut self, task: impl IdleTask + Send + 'static) -> Self {
        self.idle_task = Some(Box::new(task));
        self
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    /// Static configuration.
    #[must_use]
    pub const fn config(&self) -> &EdmConfig {
        &self.config
    }

    /// Scratch memory.
    #[must_use]
    pub const fn memory(&self) -> &L1Memory {
        &self.mem
    }

    /// Credit registers.
    #[must_use]
    pub const fn registers(&self) -> &StreamRegisters {
        &self.regs
    }

    /// Link.
    #[must_use]
    pub const fn link(&self) -> &L {
        &self.link
    }

    /// Sender channel `channel`.
    #[must_use]
    pub fn sender(&self, channel: u8) -> &SenderChannel {
        &self.senders[usize::from(channel)]
    }

    /// Receiver channel.
    #[must_use]
    pub const fn receiver(&self) -> &ReceiverChannel<P, N> {
        &self.receiver
    }

    /// Shared view of the peer's receiver channel.
    #[must_use]
    pub const fn outbound(&self) -> &OutboundReceiverChannelPointers {
        &self.outbound
    }

    /// Counters of sender channel `channel`.
    #[must_use]
    pub fn sender_counters(&self, channel: u8) -> CountersSnapshot {
        self.sender(channel).counters().snapshot()
    }

    /// Counters of the receiver channel.
    #[must_use]
    pub fn receiver_counters(&self) -> CountersSnapshot {
        self.receiver.counters().snapshot()
    }

    /// Headers captured on sender channel `channel`, oldest first.
    #[must_use]
    pub fn recorded_sender_headers(&self, channel: u8) -> Vec<PacketHeader> {
        self.sender(channel)
            .recorder()
            .map(PacketHeaderRecorder::read_back)
            .unwrap_or_default()
    }

    /// Headers captured on the receiver channel, oldest first.
    #[must_use]
    pub fn recorded_receiver_headers(&self) -> Vec<PacketHeader> {
        self.receiver
            .recorder()
            .map(PacketHeaderRecorder::read_back)
            .unwrap_or_default()
    }

    /// Prepare memory and registers, then begin the link handshake.
    #[instrument(level = "debug", skip(self), fields(role = ?self.config.handshake_role))]
    pub fn start(&mut self) -> Result<()> {
        for stream in StreamId::ALL {
            self.regs.init(stream, 0);
        }
        if self.config.persistent_mode {
            for addr in self.runtime.semaphores() {
                self.mem.write_u32(addr, 0);
            }
        }
        for sender in &self.senders {
            sender.interface().init(&self.mem);
        }
        TerminationSignal::KeepRunning.write(&self.mem, self.config.termination_signal_address);

        self.handshake.start(&self.mem, &self.link);
        self.handshake_started = Some(Instant::now());
        self.state = EngineState::Handshaking;
        debug!("engine started");
        Ok(())
    }

    /// Run one iteration of the main loop.
    ///
    /// Starts the engine if needed. A fatal error halts it; later calls then return
    /// [`EngineState::Halted`] without doing anything.
    pub fn step(&mut self) -> Result<EngineState> {
        let result = self.step_inner();
        if let Err(err) = &result {
            warn!(%err, "engine halted");
            self.state = EngineState::Halted;
        }
        result
    }

    fn step_inner(&mut self) -> Result<EngineState> {
        match self.state {
            EngineState::Terminated | EngineState::Halted => return Ok(self.state),
            EngineState::Init => {
                self.start()?;
                return Ok(self.state);
            }
            EngineState::Handshaking => {
                self.poll_handshake()?;
                return Ok(self.state);
            }
            EngineState::Running => {}
        }

        match TerminationSignal::read(&self.mem, self.config.termination_signal_address) {
            TerminationSignal::ImmediatelyTerminate => {
                self.finish("immediate");
                return Ok(self.state);
            }
            TerminationSignal::GracefullyTerminate if self.all_channels_drained() => {
                self.finish("graceful");
                return Ok(self.state);
            }
            _ => {}
        }

        let io = EngineIo {
            mem: &self.mem,
            regs: &self.regs,
            link: &self.link,
            noc: &self.noc,
            validate_headers: self.config.validate_headers,
        };
        let channel = self.sender_channel_index;
        let did_sender =
            self.senders[channel].step(&io, &mut self.outbound, &self.remote_receiver)?;
        self.sender_channel_index = 1 - channel;
        let did_receiver = self.receiver.step(&io)?;

        if did_sender || did_receiver {
            self.did_nothing_count = 0;
        } else {
            self.did_nothing_count += 1;
            if self.did_nothing_count > self.config.switch_interval {
                self.did_nothing_count = 0;
                if let Some(task) = self.idle_task.as_mut() {
                    task.run();
                }
            }
        }
        Ok(self.state)
    }

    fn poll_handshake(&mut self) -> Result<()> {
        if self.handshake.poll(&self.mem, &self.link) {
            if let Some(downstream) = self.receiver.downstream_mut() {
                match downstream.try_open() {
                    Ok(()) => debug!(core = %downstream.edm().edm_core, "downstream connected"),
                    Err(ConnectError::ChannelBusy { .. }) => return Ok(()),
                    Err(err) => return Err(err.into()),
                }
            }
            self.state = EngineState::Running;
            info!(role = ?self.handshake.role(), "link up");
            return Ok(());
        }

        let timeout = self.config.handshake_timeout;
        if let (Some(limit), Some(started)) = (timeout, self.handshake_started) {
            let waited = started.elapsed();
            if waited >= limit {
                return Err(EngineError::HandshakeTimeout { waited });
            }
        }
        Ok(())
    }

    /// Step until the engine terminates or halts.
    pub fn run(&mut self) -> Result<()> {
        loop {
            match self.step()? {
                EngineState::Terminated | EngineState::Halted => return Ok(()),
                _ => std::hint::spin_loop(),
            }
        }
    }

    /// Whether nothing is in flight anywhere on this engine.
    #[must_use]
    pub fn all_channels_drained(&self) -> bool {
        self.senders.iter().all(|sender| {
            sender.interface().all_eth_packets_completed()
                && !sender.interface().has_unsent_payload(&self.mem)
        }) && self.receiver.pointers().is_drained()
            && self.regs.all_zero()
    }

    fn finish(&mut self, reason: &str) {
        if let Some(downstream) = self.receiver.downstream_mut() {
            if downstream.is_connected() {
                if let Err(err) = downstream.close() {
                    warn!(%err, "failed to close downstream connection");
                }
            }
        }
        if self.config.persistent_mode {
            for addr in self.runtime.semaphores() {
                self.mem.write_u32(addr, PERSISTENT_EXIT_SENTINEL);
            }
        }
        self.state = EngineState::Terminated;
        let sent: u64 = self
            .senders
            .iter()
            .map(|sender| sender.counters().snapshot().packets_sent)
            .sum();
        info!(
            reason,
            sent,
            received = self.receiver.counters().snapshot().packets_received,
            "engine terminated"
        );
    }
}

impl<L, N, P> std::fmt::Debug for DataMover<L, N, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataMover")
            .field("state", &self.state)
            .field("handshake", &self.handshake)
            .field("outbound", &self.outbound)
            .field("sender_channel_index", &self.sender_channel_index)
            .finish_non_exhaustive()
    }
}
