#![allow(dead_code)]

use std::time::Duration;

use fabric_mover::edm::{
    DataMover, EdmConfig, EngineState, RuntimeArgs, WorkerLocation, WorkerToFabricSender,
};
use fabric_mover::protocol::{ChipId, Direction, LineRouting, Packet};
use fabric_mover::transport::{
    HandshakeRole, L1Memory, NocAddr, NocXy, SimEthLink, SimNoc, SimNocFabric, StreamRegisters,
};

pub type Engine = DataMover<SimEthLink, SimNoc, LineRouting>;
pub type Producer = WorkerToFabricSender<SimNoc>;

pub const EDM_EAST: NocXy = NocXy::new(0, 0);
pub const EDM_WEST: NocXy = NocXy::new(0, 1);
pub const WORKER: NocXy = NocXy::new(1, 0);
pub const DEST: NocXy = NocXy::new(2, 0);

pub const DEST_SIZE: usize = 64 * 1024;
pub const LINK_LATENCY: u32 = 1;
pub const FLUSH_LATENCY: u32 = 2;
pub const MAX_STEPS: usize = 200_000;

/// Sender channel an engine uses to forward into its neighbour on the same chip.
pub const FORWARD_CHANNEL: u8 = 1;

pub struct Chip {
    pub id: ChipId,
    pub fabric: SimNocFabric,
    pub worker: L1Memory,
    pub dest: L1Memory,
}

impl Chip {
    fn new(device_id: u16) -> Self {
        let fabric = SimNocFabric::new();
        let worker = L1Memory::new(256);
        let dest = L1Memory::new(DEST_SIZE);
        fabric.register(WORKER, worker.clone());
        fabric.register(DEST, dest.clone());
        Self {
            id: ChipId::new(0, device_id),
            fabric,
            worker,
            dest,
        }
    }
}

/// Chips on a line, chip `i` linked to chip `i + 1`.
///
/// `east[i]` is the engine on chip `i` facing east and `west[i]` its peer on chip `i + 1`.
/// Eastbound traffic received on chip `i + 1` is forwarded through that chip's east
/// engine, on [`FORWARD_CHANNEL`].
pub struct Line {
    pub config: EdmConfig,
    pub runtime: RuntimeArgs,
    pub chips: Vec<Chip>,
    pub east: Vec<Engine>,
    pub west: Vec<Engine>,
}

impl Line {
    pub fn new(num_chips: usize, config: EdmConfig) -> Self {
        Self::build(num_chips, config, |engine| engine)
    }

    pub fn build(
        num_chips: usize,
        config: EdmConfig,
        mut decorate: impl FnMut(Engine) -> Engine,
    ) -> Self {
        assert!(num_chips >= 2, "a line needs two chips");
        let runtime = RuntimeArgs::from_layout();
        let chips: Vec<Chip> = (0..num_chips).map(|i| Chip::new(i as u16)).collect();
        let l1_size = config.required_l1_size();

        let mut east = Vec::new();
        let mut west = Vec::new();
        for i in 0..num_chips - 1 {
            let (left, right) = (&chips[i], &chips[i + 1]);
            let east_mem = L1Memory::new(l1_size);
            let west_mem = L1Memory::new(l1_size);
            left.fabric.register(EDM_EAST, east_mem.clone());
            right.fabric.register(EDM_WEST, west_mem.clone());
            let east_regs = StreamRegisters::new();
            let west_regs = StreamRegisters::new();
            let (east_link, west_link) = SimEthLink::pair(
                (east_mem.clone(), east_regs.clone()),
                (west_mem.clone(), west_regs.clone()),
                LINK_LATENCY,
            );

            let mut east_runtime = runtime.clone();
            if i > 0 {
                east_runtime = east_runtime.with_downstream(
                    EDM_EAST,
                    config.sender_connection(&runtime, EDM_WEST, FORWARD_CHANNEL),
                );
            }
            let mut west_runtime = runtime.clone();
            if i + 2 < num_chips {
                west_runtime = west_runtime.with_downstream(
                    EDM_WEST,
                    config.sender_connection(&runtime, EDM_EAST, FORWARD_CHANNEL),
                );
            }

            let east_engine = DataMover::new(
                config.clone().handshake_role(HandshakeRole::Sender),
                east_runtime,
                east_mem,
                east_regs,
                east_link,
                left.fabric.port(FLUSH_LATENCY),
                LineRouting::new(left.id, Direction::West),
            )
            .expect("east engine config");
            let west_engine = DataMover::new(
                config.clone().handshake_role(HandshakeRole::Receiver),
                west_runtime,
                west_mem,
                west_regs,
                west_link,
                right.fabric.port(FLUSH_LATENCY),
                LineRouting::new(right.id, Direction::East),
            )
            .expect("west engine config");
            east.push(decorate(east_engine));
            west.push(decorate(west_engine));
        }

        Self {
            config,
            runtime,
            chips,
            east,
            west,
        }
    }

    pub fn engines(&mut self) -> impl Iterator<Item = &mut Engine> {
        self.east.iter_mut().chain(self.west.iter_mut())
    }

    pub fn step_all(&mut self) {
        for engine in self.engines() {
            engine.step().expect("engine step");
        }
    }

    pub fn run_until(&mut self, mut done: impl FnMut(&Self) -> bool) {
        for _ in 0..MAX_STEPS {
            if done(self) {
                return;
            }
            self.step_all();
        }
        panic!("condition not reached after {MAX_STEPS} steps");
    }

    /// Start every engine and wait for all links to come up.
    pub fn bring_up(&mut self) {
        self.run_until(|line| {
            line.east
                .iter()
                .chain(&line.west)
                .all(|engine| engine.state() == EngineState::Running)
        });
    }

    /// A producer on chip `chip` attached to the east engine's sender `channel`; `slot`
    /// separates the flow-control words of producers sharing a worker core.
    pub fn producer(&self, chip: usize, channel: u8, slot: usize) -> Producer {
        let edm = self.config.sender_connection(&self.runtime, EDM_EAST, channel);
        WorkerToFabricSender::new(
            self.chips[chip].fabric.port(0),
            self.chips[chip].worker.clone(),
            edm,
            WorkerLocation {
                core: WORKER,
                read_ptr_address: slot * 16,
                teardown_address: slot * 16 + 4,
            },
        )
        .with_timeout(Some(Duration::from_secs(5)))
    }

    /// Wait for a free slot, then write `packet`.
    pub fn send(&mut self, producer: &mut Producer, packet: &Packet) {
        self.run_until(|_| producer.has_space_for_packet());
        producer.send_packet(packet).expect("send packet");
    }

    pub fn dest(&self, chip: usize, offset: usize, len: usize) -> Vec<u8> {
        self.chips[chip].dest.read(offset, len)
    }
}

/// NoC address of `offset` in the destination core.
pub fn target(offset: usize) -> u64 {
    NocAddr::new(DEST, offset).to_u64()
}

/// Payload of `len` bytes derived from `seed`.
pub fn pattern(seed: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| (seed * 31 + i) as u8).collect()
}

/// Small slots so tests wrap the rings quickly.
pub fn small_config() -> EdmConfig {
    let mut config = EdmConfig::with_layout(512, 4, 4).with_recorder(64);
    config.enable_fabric_counters = true;
    config.validate_headers = true;
    config
}
