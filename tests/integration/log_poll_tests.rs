//! Round-robin log harvesting over the simulated bus.

use super::mock_bus::{RecordingSink, SimDevice, config, run, service};

use busmaster::adapters::memory::MemoryStreamSource;
use busmaster::app::commands::BusCommand;
use busmaster::app::events::BusEvent;
use busmaster::app::ports::RecordStore;
use busmaster::config::Roster;
use busmaster::protocol::Opcode;

const D1: u16 = 0x0010;
const D2: u16 = 0x0011;
const D3: u16 = 0x0012;

#[test]
fn harvests_and_deletes_every_pending_log() {
    let cfg = config(&[D1, D2, D3]);
    let devices = vec![
        SimDevice::new(D1).with_logs(&[0x21, 0x22]),
        SimDevice::new(D2),
        SimDevice::new(D3).with_logs(&[0x23]),
    ];
    let (mut svc, _q) = service(devices, MemoryStreamSource::new(), &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    svc.handle_command(BusCommand::StartPolling).unwrap();
    run(&mut svc, &mut sink, &mut now, 200);

    let store = svc.log_poll().store();
    assert_eq!(store.count(), 3);
    let records: Vec<_> = store.iter().copied().collect();
    assert_eq!(&records[0][..3], &[0x00, 0x10, 0x21], "address overwritten, event kept");
    assert_eq!(&records[1][..3], &[0x00, 0x10, 0x22]);
    assert_eq!(&records[2][..3], &[0x00, 0x12, 0x23]);
    assert_eq!(records[0][3], 0x5A);

    let bus = svc.arbiter().transport();
    assert!(bus.device(D1).logs.is_empty());
    assert!(bus.device(D3).logs.is_empty());
    assert!(bus.opcodes_to(D2).iter().all(|&op| op == Opcode::StatusQuery.code()));
    assert!(svc.log_poll().cycles() >= 1);
    assert!(sink.count(|e| matches!(e, BusEvent::PollCycleCompleted { .. })) >= 1);
}

#[test]
fn silent_device_is_skipped_after_timeout() {
    let cfg = config(&[D1, D2]);
    let mut dead = SimDevice::new(D1);
    dead.silent = true;
    let devices = vec![dead, SimDevice::new(D2).with_logs(&[0x30])];
    let (mut svc, _q) = service(devices, MemoryStreamSource::new(), &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    svc.handle_command(BusCommand::StartPolling).unwrap();
    run(&mut svc, &mut sink, &mut now, 150);
    assert_eq!(svc.log_poll().store().count(), 0, "still waiting on D1");

    run(&mut svc, &mut sink, &mut now, 100);
    assert_eq!(svc.log_poll().store().count(), 1);
    assert!(svc.arbiter().stats().timeouts >= 1);
}

#[test]
fn lost_log_reply_is_retried() {
    let cfg = config(&[D1]);
    let mut device = SimDevice::new(D1).with_logs(&[0x44]);
    device.swallow_log_requests = 1;
    let (mut svc, _q) = service(vec![device], MemoryStreamSource::new(), &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    svc.handle_command(BusCommand::StartPolling).unwrap();
    run(&mut svc, &mut sink, &mut now, 400);

    assert_eq!(svc.log_poll().store().count(), 1);
    let log_requests = svc
        .arbiter()
        .transport()
        .opcodes_to(D1)
        .into_iter()
        .filter(|&op| op == Opcode::LogQuery.code())
        .count();
    assert_eq!(log_requests, 2);
}

#[test]
fn stop_polling_releases_bus_and_roster_reload_restarts() {
    let cfg = config(&[D1]);
    let mut dead = SimDevice::new(D1);
    dead.silent = true;
    let (mut svc, _q) = service(
        vec![dead, SimDevice::new(D2).with_logs(&[0x50])],
        MemoryStreamSource::new(),
        &cfg,
    );
    let mut sink = RecordingSink::new();
    let mut now = 0;

    svc.handle_command(BusCommand::StartPolling).unwrap();
    run(&mut svc, &mut sink, &mut now, 5);
    assert!(svc.arbiter().lease_holder().is_some());

    svc.handle_command(BusCommand::StopPolling).unwrap();
    assert_eq!(svc.arbiter().lease_holder(), None);
    let sent = svc.arbiter().stats().frames_sent;
    run(&mut svc, &mut sink, &mut now, 20);
    assert_eq!(svc.arbiter().stats().frames_sent, sent);

    let mut roster = Roster::new();
    roster.push(D2).unwrap();
    svc.handle_command(BusCommand::LoadRoster(roster)).unwrap();
    svc.handle_command(BusCommand::StartPolling).unwrap();
    run(&mut svc, &mut sink, &mut now, 20);
    assert_eq!(svc.log_poll().store().count(), 1);
    assert_eq!(svc.log_poll().store().iter().next().unwrap()[1], 0x11);
}
