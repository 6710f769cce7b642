//! BusService arbitration: priority, time broadcast, line noise.

use std::pin::pin;

use super::mock_bus::{BROADCAST, MASTER, RecordingSink, SimDevice, config, run, service};

use busmaster::adapters::memory::MemoryStreamSource;
use busmaster::app::commands::BusCommand;
use busmaster::app::events::BusEvent;
use busmaster::bus::BusState;
use busmaster::clients::QueryCommand;
use busmaster::protocol::Opcode;
use busmaster::protocol::frame::{Frame, FrameKind, parse};

const D1: u16 = 0x0010;
const D2: u16 = 0x0011;

#[test]
fn time_is_broadcast_at_startup_and_on_demand() {
    let cfg = config(&[]);
    let (mut svc, _q) = service(vec![SimDevice::new(D1), SimDevice::new(D2)], MemoryStreamSource::new(), &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    run(&mut svc, &mut sink, &mut now, 10);
    let bus = svc.arbiter().transport();
    // 2025-03-14 15:09:26, Friday
    let expected = vec![0x20, 0x05, 0x14, 0x03, 0x25, 0x15, 0x09, 0x26];
    assert_eq!(bus.device(D1).rtc, vec![expected.clone()]);
    assert_eq!(bus.device(D2).rtc, vec![expected]);
    let first = parse(&bus.sent[0]).unwrap();
    assert_eq!(first.target(), BROADCAST);
    assert_eq!(first.source(), MASTER);

    svc.handle_command(BusCommand::BroadcastTimeNow).unwrap();
    run(&mut svc, &mut sink, &mut now, 10);
    assert_eq!(svc.time().sent(), 2);
    assert_eq!(sink.count(|e| matches!(e, BusEvent::TimeBroadcast(_))), 2);
}

#[test]
fn query_takes_the_bus_ahead_of_log_polling() {
    let cfg = config(&[D1]);
    let (mut svc, client) = service(
        vec![SimDevice::new(D1).with_logs(&[1, 2, 3]), SimDevice::new(D2)],
        MemoryStreamSource::new(),
        &cfg,
    );
    let mut sink = RecordingSink::new();
    let mut now = 0;

    // Let polling get going, ending on a free bus.
    run(&mut svc, &mut sink, &mut now, 4);
    while svc.arbiter().state() != BusState::Idle {
        run(&mut svc, &mut sink, &mut now, 1);
    }

    let command = QueryCommand::SetDigitalOutputs { mask: 0x81 };
    let mut query = pin!(client.query(D2, &command));
    assert!(futures_lite::future::block_on(futures_lite::future::poll_once(query.as_mut())).is_none());

    let before = svc.arbiter().transport().sent.len();
    run(&mut svc, &mut sink, &mut now, 1);
    let bus = svc.arbiter().transport();
    let next = parse(&bus.sent[before]).unwrap();
    assert_eq!(next.target(), D2);
    assert_eq!(next.opcode(), Some(Opcode::DigitalOutputSet.code()));

    run(&mut svc, &mut sink, &mut now, 1);
    let reply = futures_lite::future::block_on(query).unwrap();
    assert_eq!(reply.as_slice(), &[0x40]);

    run(&mut svc, &mut sink, &mut now, 50);
    assert_eq!(svc.log_poll().store().iter().count(), 3);
}

#[test]
fn foreign_and_corrupt_frames_do_not_disturb_a_reply() {
    let cfg = config(&[D1]);
    let (mut svc, _q) = service(vec![SimDevice::new(D1).with_logs(&[7])], MemoryStreamSource::new(), &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    let foreign = Frame::new(FrameKind::Ack, 0x0002, D2, &[0x10, 0]).unwrap().encode();
    let mut corrupt = Frame::new(FrameKind::Ack, MASTER, D2, &[0x10, 0]).unwrap().encode();
    let sum_at = corrupt.len() - 2;
    corrupt[sum_at] ^= 0xFF;
    let wire = svc.arbiter_mut().transport_mut();
    wire.noise.extend_from_slice(&foreign);
    wire.noise.extend_from_slice(&corrupt);

    run(&mut svc, &mut sink, &mut now, 30);
    let stats = svc.arbiter().stats();
    assert_eq!(stats.foreign_frames, 1);
    assert_eq!(stats.checksum_errors, 1);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(svc.log_poll().store().iter().count(), 1);

    let snap = svc.status().snapshot();
    assert_eq!(snap.faults, 1);
    assert_eq!(snap.stored_logs, 1);
    assert!(snap.frames_sent >= 4);
}
