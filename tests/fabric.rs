mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use common::{FORWARD_CHANNEL, Line, MAX_STEPS, pattern, small_config, target};
use fabric_mover::edm::{
    ConfigError, ConnectError, DataMover, EdmConfig, EngineError, EngineState,
    PERSISTENT_EXIT_SENTINEL, RuntimeArgs, TerminationSignal,
};
use fabric_mover::protocol::{
    self, ChipId, Direction, LineRouting, MulticastRoute, Packet, PacketHeader,
};
use fabric_mover::transport::{L1Memory, SimEthLink, SimNocFabric, StreamRegisters};

#[test]
fn unicast_stream_is_written_in_order() {
    let mut config = EdmConfig::with_layout(4096, 8, 8).with_recorder(32);
    config.enable_fabric_counters = true;
    config.validate_headers = true;
    let mut line = Line::new(2, config);
    line.bring_up();

    let dst = line.chips[1].id;
    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    for i in 0..20 {
        let packet = Packet::unicast_write(dst, target(i * 256), pattern(i, 256));
        line.send(&mut producer, &packet);
    }
    line.run_until(|line| line.east[0].sender_counters(0).completions == 20);

    for i in 0..20 {
        assert_eq!(line.dest(1, i * 256, 256), pattern(i, 256), "packet {i}");
    }

    let recorded = line.east[0].recorded_sender_headers(0);
    let targets: Vec<u64> = recorded.iter().map(PacketHeader::target).collect();
    let expected: Vec<u64> = (0..20).map(|i| target(i * 256)).collect();
    assert_eq!(targets, expected);
    assert!(recorded.iter().all(|header| header.src_ch_id() == 0));

    let sent = line.east[0].sender_counters(0);
    assert_eq!(sent.packets_sent, 20);
    assert_eq!(sent.bytes_sent, 20 * 320);
    assert_eq!(sent.avg_packet_bytes(), Some(320));
    assert!(sent.max_in_flight <= 8);
    assert_eq!(line.east[0].outbound().wrptr.get_ptr(), 20 % 16);
    assert_eq!(line.east[0].outbound().wrptr.get_buffer_index(), 4);

    // Slots were filled 0..7, 0..7, 0..3: the last writer of each slot tells the order.
    let sender_slots = line.config.sender_channel(0);
    let receiver_slots = line.config.receiver_channel();
    for slot in 0..8 {
        let last = if slot < 4 { 16 + slot } else { 8 + slot };
        let local = PacketHeader::from_bytes(&line.east[0].memory().read(
            sender_slots.get_packet_header_address(slot),
            64,
        ))
        .unwrap();
        let remote = PacketHeader::from_bytes(&line.west[0].memory().read(
            receiver_slots.get_packet_header_address(slot),
            64,
        ))
        .unwrap();
        assert_eq!(local.target(), target(last * 256), "sender slot {slot}");
        assert_eq!(remote.target(), target(last * 256), "receiver slot {slot}");
        assert_eq!(remote.src_ch_id(), 0);
    }

    let received = line.west[0].receiver_counters();
    assert_eq!(received.packets_received, 20);
    assert_eq!(received.local_writes, 20);
    assert_eq!(received.forwards, 0);

    line.run_until(|line| line.chips[0].worker.read_u32(0) == 20);
}

#[test]
fn atomic_increments_land_on_destination() {
    let mut line = Line::new(2, small_config());
    line.bring_up();

    let dst = line.chips[1].id;
    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    for _ in 0..3 {
        line.send(&mut producer, &Packet::atomic_inc(dst, target(0x100), 2, 0));
    }
    let payload = pattern(3, 32);
    line.send(
        &mut producer,
        &Packet::write_atomic_inc(dst, target(0x200), payload.clone(), target(0x104), 1),
    );
    line.run_until(|line| line.east[0].sender_counters(0).completions == 4);

    assert_eq!(line.chips[1].dest.read_u32(0x100), 6);
    assert_eq!(line.chips[1].dest.read_u32(0x104), 1);
    assert_eq!(line.dest(1, 0x200, 32), payload);
}

#[test]
fn multicast_writes_every_chip_on_the_route() {
    let mut line = Line::new(3, small_config());
    line.bring_up();

    let payload = pattern(7, 128);
    let packet = Packet::multicast_write(
        line.chips[1].id,
        MulticastRoute::toward(Direction::East, 1),
        target(0x400),
        payload.clone(),
    );
    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    line.send(&mut producer, &packet);
    line.run_until(|line| line.dest(2, 0x400, 128) == payload);
    line.run_until(|line| line.east[0].sender_counters(0).completions == 1);

    assert_eq!(line.dest(1, 0x400, 128), payload);
    assert_eq!(line.dest(0, 0x400, 128), vec![0; 128]);

    let first_hop = line.west[0].receiver_counters();
    assert_eq!(first_hop.local_writes, 1);
    assert_eq!(first_hop.forwards, 1);
    let last_hop = line.west[1].receiver_counters();
    assert_eq!(last_hop.local_writes, 1);
    assert_eq!(last_hop.forwards, 0);

    let forwarded = line.west[1].recorded_receiver_headers();
    assert_eq!(forwarded.len(), 1);
    assert!(forwarded[0].routing_flags().is_mcast_active());
    assert_eq!(forwarded[0].multicast().east, 0);
    assert!(forwarded[0].is_valid());
}

#[test]
fn multicast_depth_two_spans_three_chips() {
    let mut line = Line::new(4, small_config());
    line.bring_up();

    let payload = pattern(5, 96);
    let packet = Packet::multicast_write(
        line.chips[1].id,
        MulticastRoute::toward(Direction::East, 2),
        target(0x600),
        payload.clone(),
    );
    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    line.send(&mut producer, &packet);
    line.run_until(|line| line.west[2].receiver_counters().local_writes == 1);

    for chip in 1..4 {
        assert_eq!(line.dest(chip, 0x600, 96), payload, "chip {chip}");
    }
    assert_eq!(line.west[1].receiver_counters().forwards, 1);
    assert_eq!(line.west[2].receiver_counters().forwards, 0);
}

#[test]
fn unicast_passes_through_intermediate_chip() {
    let mut line = Line::new(3, small_config());
    line.bring_up();

    let payload = pattern(11, 200);
    let packet = Packet::unicast_write(line.chips[2].id, target(0x800), payload.clone());
    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    line.send(&mut producer, &packet);
    line.run_until(|line| line.dest(2, 0x800, 200) == payload);

    assert_eq!(line.dest(1, 0x800, 200), vec![0; 200]);
    assert_eq!(line.west[0].receiver_counters().local_writes, 0);
    assert_eq!(line.west[0].receiver_counters().forwards, 1);
    line.run_until(|line| line.east[1].sender_counters(FORWARD_CHANNEL).completions == 1);
    assert_eq!(line.east[1].sender_counters(FORWARD_CHANNEL).connections, 1);
}

#[test]
fn channel_is_not_readvertised_until_drained() {
    let mut line = Line::new(2, small_config());
    line.bring_up();
    let dst = line.chips[1].id;

    let mut first = line.producer(0, 0, 0);
    first.try_open().unwrap();
    for i in 0..5 {
        line.send(&mut first, &Packet::unicast_write(dst, target(i * 64), pattern(i, 64)));
    }
    first.close().unwrap();

    let mut second = line.producer(0, 0, 1);
    assert!(matches!(
        second.try_open(),
        Err(ConnectError::ChannelBusy { channel: 0, .. })
    ));

    line.run_until(|_| first.teardown_complete());
    let sent = line.east[0].sender_counters(0);
    assert_eq!(sent.completions, 5);
    assert_eq!(sent.teardowns, 1);

    second.try_open().unwrap();
    assert_eq!(second.packets_written(), 5);
    let payload = pattern(9, 64);
    line.send(
        &mut second,
        &Packet::unicast_write(dst, target(0x1000), payload.clone()),
    );
    second.close().unwrap();
    line.run_until(|_| second.teardown_complete());

    assert_eq!(line.dest(1, 0x1000, 64), payload);
    let sent = line.east[0].sender_counters(0);
    assert_eq!(sent.connections, 2);
    assert_eq!(sent.teardowns, 2);
    assert_eq!(sent.completions, 6);
}

#[test]
fn close_before_engine_looks_is_still_torn_down() {
    let mut line = Line::new(2, small_config());
    line.bring_up();

    let mut producer = line.producer(0, 1, 0);
    producer.try_open().unwrap();
    producer.close().unwrap();
    line.run_until(|_| producer.teardown_complete());

    assert_eq!(line.east[0].sender_counters(1).connections, 1);
    assert_eq!(line.east[0].sender_counters(1).teardowns, 1);
    producer.try_open().unwrap();
}

#[test]
fn producers_share_the_link_fairly() {
    let mut line = Line::new(2, small_config());
    line.bring_up();
    let dst = line.chips[1].id;

    let mut a = line.producer(0, 0, 0);
    let mut b = line.producer(0, 1, 1);
    a.try_open().unwrap();
    b.try_open().unwrap();
    for i in 0..10 {
        line.send(&mut a, &Packet::unicast_write(dst, target(i * 64), pattern(i, 64)));
        line.send(
            &mut b,
            &Packet::unicast_write(dst, target(0x2000 + i * 64), pattern(100 + i, 64)),
        );
    }
    line.run_until(|line| {
        line.east[0].sender_counters(0).completions == 10
            && line.east[0].sender_counters(1).completions == 10
    });

    for i in 0..10 {
        assert_eq!(line.dest(1, i * 64, 64), pattern(i, 64));
        assert_eq!(line.dest(1, 0x2000 + i * 64, 64), pattern(100 + i, 64));
    }
    assert!(line.east[0].sender_counters(0).max_in_flight <= 4);
    assert!(line.east[0].sender_counters(1).max_in_flight <= 4);
}

#[test]
fn graceful_termination_waits_for_drain() {
    let mut line = Line::new(2, small_config());
    line.bring_up();
    let dst = line.chips[1].id;
    let signal_address = line.config.termination_signal_address;

    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    for i in 0..8 {
        line.send(&mut producer, &Packet::unicast_write(dst, target(i * 64), pattern(i, 64)));
    }

    TerminationSignal::GracefullyTerminate.write(line.east[0].memory(), signal_address);
    line.step_all();
    assert_eq!(line.east[0].state(), EngineState::Running);

    line.run_until(|line| line.east[0].state() == EngineState::Terminated);
    assert_eq!(line.east[0].sender_counters(0).completions, 8);
    assert!(line.east[0].registers().all_zero());
    assert!(line.east[0].all_channels_drained());
    for i in 0..8 {
        assert_eq!(line.dest(1, i * 64, 64), pattern(i, 64));
    }

    TerminationSignal::GracefullyTerminate.write(line.west[0].memory(), signal_address);
    line.run_until(|line| line.west[0].state() == EngineState::Terminated);
    assert!(line.west[0].registers().all_zero());
}

#[test]
fn immediate_termination_leaves_work_behind() {
    let mut line = Line::new(2, small_config());
    line.bring_up();
    let dst = line.chips[1].id;

    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    for i in 0..3 {
        line.send(&mut producer, &Packet::unicast_write(dst, target(i * 64), pattern(i, 64)));
    }

    TerminationSignal::ImmediatelyTerminate
        .write(line.east[0].memory(), line.config.termination_signal_address);
    assert_eq!(line.east[0].step().unwrap(), EngineState::Terminated);
    for _ in 0..10 {
        line.step_all();
    }

    let east = &line.east[0];
    assert_eq!(east.sender_counters(0).packets_sent, 0);
    assert!(east.sender(0).interface().has_unsent_payload(east.memory()));
}

#[test]
fn persistent_mode_resets_and_stamps_semaphores() {
    let mut config = small_config();
    config.persistent_mode = true;
    let mut line = Line::new(2, config);
    let runtime = line.runtime.clone();
    let words: Vec<usize> = runtime
        .connection_live_semaphore
        .iter()
        .chain(&runtime.packets_written_semaphore)
        .chain(&runtime.channel_claim)
        .copied()
        .collect();

    for &addr in &words {
        line.east[0].memory().write_u32(addr, 7);
    }
    line.bring_up();
    for &addr in &words {
        assert_eq!(line.east[0].memory().read_u32(addr), 0, "word {addr:#x}");
    }

    TerminationSignal::ImmediatelyTerminate
        .write(line.east[0].memory(), line.config.termination_signal_address);
    line.step_all();
    assert_eq!(line.east[0].state(), EngineState::Terminated);
    for &addr in &words {
        assert_eq!(
            line.east[0].memory().read_u32(addr),
            PERSISTENT_EXIT_SENTINEL
        );
    }
}

#[test]
fn handshake_times_out_without_peer() {
    let mut config = small_config();
    config.handshake_timeout = Some(Duration::ZERO);
    let mut line = Line::new(2, config);

    let east = &mut line.east[0];
    assert_eq!(east.step().unwrap(), EngineState::Handshaking);
    let error = east.step().unwrap_err();
    assert!(matches!(error, EngineError::HandshakeTimeout { .. }));
    assert_eq!(east.state(), EngineState::Halted);
    assert_eq!(east.step().unwrap(), EngineState::Halted);
}

#[test]
fn corrupt_header_halts_engine() {
    let mut line = Line::new(2, small_config());
    line.bring_up();

    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    let packet = Packet::unicast_write(line.chips[1].id, target(0), pattern(0, 64));
    line.send(&mut producer, &packet);

    let header = line.config.sender_channel(0).get_packet_header_address(0);
    let mem = line.east[0].memory().clone();
    let corrupted = mem.read_u32(header + 16) ^ 0xFFFF_FFFF;
    mem.write_u32(header + 16, corrupted);

    let error = (0..4)
        .find_map(|_| line.east[0].step().err())
        .expect("engine halts on a corrupt header");
    assert!(matches!(
        error,
        EngineError::CorruptHeader {
            channel: 0,
            slot: 0,
            ..
        }
    ));
    assert_eq!(line.east[0].state(), EngineState::Halted);
}

#[test]
fn packet_without_route_halts_receiver() {
    let mut line = Line::new(2, small_config());
    line.bring_up();

    let nowhere = ChipId::new(0, 9);
    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    line.send(&mut producer, &Packet::unicast_write(nowhere, target(0), vec![1u8; 16]));

    let mut error = None;
    for _ in 0..MAX_STEPS {
        line.east[0].step().unwrap();
        if let Err(err) = line.west[0].step() {
            error = Some(err);
            break;
        }
    }
    assert!(matches!(
        error,
        Some(EngineError::NoDownstream { destination, .. }) if destination == nowhere
    ));
}

#[test]
fn idle_task_runs_when_nothing_moves() {
    let mut config = small_config();
    config.switch_interval = 4;
    let runs = Arc::new(AtomicUsize::new(0));
    let mut line = Line::build(2, config, |engine| {
        let runs = Arc::clone(&runs);
        engine.with_idle_task(move || {
            runs.fetch_add(1, Ordering::Relaxed);
        })
    });
    line.bring_up();

    for _ in 0..50 {
        line.step_all();
    }
    assert!(runs.load(Ordering::Relaxed) >= 20);
}

#[test]
fn unknown_source_channel_halts_receiver() {
    let mut line = Line::new(2, small_config());
    line.bring_up();

    let mut producer = line.producer(0, 0, 0);
    producer.try_open().unwrap();
    let packet = Packet::unicast_write(line.chips[1].id, target(0), pattern(0, 64));
    line.send(&mut producer, &packet);
    while line.east[0].sender_counters(0).packets_sent == 0 {
        line.east[0].step().unwrap();
    }

    let header = line.config.receiver_channel().get_packet_header_address(0);
    line.west[0].memory().write(header + PacketHeader::src_ch_id_offset(), &[7]);

    let error = line.west[0].step().unwrap_err();
    assert_eq!(
        error,
        EngineError::CorruptHeader {
            channel: line.config.receiver_channel().id(),
            slot: 0,
            source: protocol::Error::InvalidSourceChannel { value: 7 },
        }
    );
    assert_eq!(line.west[0].state(), EngineState::Halted);
}

#[test]
fn semaphore_outside_memory_is_rejected_at_construction() {
    let config = small_config();
    let l1_size = config.required_l1_size();
    let mut runtime = RuntimeArgs::from_layout();
    runtime.connection_live_semaphore[0] = l1_size + 0x1000;

    let mem = L1Memory::new(l1_size);
    let regs = StreamRegisters::new();
    let (link, _peer) = SimEthLink::pair(
        (mem.clone(), regs.clone()),
        (L1Memory::new(l1_size), StreamRegisters::new()),
        0,
    );
    let result = DataMover::new(
        config,
        runtime,
        mem,
        regs,
        link,
        SimNocFabric::new().port(0),
        LineRouting::new(ChipId::new(0, 0), Direction::West),
    );
    assert!(matches!(
        result,
        Err(EngineError::Config(ConfigError::OutOfBounds {
            what: "live flag 0",
            ..
        }))
    ));
}

#[test]
fn uneven_slot_counts_deliver_in_order() {
    for (senders, receivers) in [(3, 5), (5, 3), (7, 2)] {
        for chips in [2, 3] {
            let mut config = EdmConfig::with_layout(512, senders, receivers);
            config.enable_fabric_counters = true;
            config.validate_headers = true;
            let mut line = Line::new(chips, config);
            line.bring_up();

            let last = chips - 1;
            let dst = line.chips[last].id;
            let mut producer = line.producer(0, 0, 0);
            producer.try_open().unwrap();
            for i in 0..23 {
                let packet = Packet::unicast_write(dst, target(i * 512), pattern(i, 448));
                line.send(&mut producer, &packet);
            }
            line.run_until(|line| line.west[last - 1].receiver_counters().local_writes == 23);
            line.run_until(|line| line.east[0].sender_counters(0).completions == 23);

            for i in 0..23 {
                assert_eq!(
                    line.dest(last, i * 512, 448),
                    pattern(i, 448),
                    "{senders}x{receivers} slots over {chips} chips, packet {i}"
                );
            }
            let sent = line.east[0].sender_counters(0);
            assert!(sent.max_in_flight <= receivers as u64);
        }
    }
}

#[test]
fn blocking_producers_against_engines_on_another_thread() {
    const COUNT: usize = 24;

    let mut line = Line::new(3, small_config());
    line.bring_up();
    let dst = line.chips[2].id;
    let mut first = line.producer(0, 0, 0);
    let mut second = line.producer(0, 0, 1);
    let packet = |i: usize| Packet::unicast_write(dst, target(i * 512), pattern(i, 448));

    let stop = AtomicBool::new(false);
    let (east, west) = (&mut line.east, &mut line.west);
    let outcome = thread::scope(|scope| {
        let engines = scope.spawn(|| {
            while !stop.load(Ordering::Acquire) {
                for engine in east.iter_mut().chain(west.iter_mut()) {
                    engine.step().expect("engine step");
                }
            }
        });

        let mut produce = || -> Result<(), ConnectError> {
            first.open()?;
            for i in 0..COUNT / 2 {
                first.wait_for_empty_write_slot()?;
                first.send_packet(&packet(i))?;
            }
            first.close()?;

            // Blocks until the engine has drained and released the channel.
            second.open()?;
            first.wait_teardown_complete()?;
            for i in COUNT / 2..COUNT {
                second.wait_for_empty_write_slot()?;
                second.send_packet(&packet(i))?;
            }
            second.close()?;
            second.wait_teardown_complete()
        };
        let outcome = produce();
        stop.store(true, Ordering::Release);
        engines.join().expect("engine thread");
        outcome
    });
    outcome.unwrap();

    assert!(first.teardown_complete());
    assert!(second.teardown_complete());
    line.run_until(|line| line.west[1].receiver_counters().local_writes == COUNT as u64);
    for i in 0..COUNT {
        assert_eq!(line.dest(2, i * 512, 448), pattern(i, 448));
    }
    let sent = line.east[0].sender_counters(0);
    assert_eq!(sent.packets_sent, COUNT as u64);
    assert_eq!(sent.teardowns, 2);
}
