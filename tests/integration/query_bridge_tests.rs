//! Synchronous queries from other threads while the bus thread polls.

use std::thread;
use std::time::{Duration, Instant};

use super::mock_bus::{BROADCAST, RecordingSink, Service, SimDevice, config, service};

use busmaster::adapters::memory::MemoryStreamSource;
use busmaster::app::events::BusEvent;
use busmaster::clients::{QueryCommand, QueryError};
use busmaster::config::BusConfig;

const DEV: u16 = 0x0042;

/// Poll in real time until `done` reports true or two seconds pass.
fn drive_until(svc: &mut Service, sink: &mut RecordingSink, done: impl Fn() -> bool) {
    let start = Instant::now();
    while !done() && start.elapsed() < Duration::from_secs(2) {
        svc.poll(start.elapsed().as_millis() as u64, sink);
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn blocking_query_returns_device_reply() {
    let cfg = config(&[]);
    let (mut svc, client) = service(vec![SimDevice::new(DEV)], MemoryStreamSource::new(), &cfg);
    let mut sink = RecordingSink::new();

    let caller = thread::spawn(move || {
        let mut reply = [0u8; 4];
        let ok = client.query_blocking(DEV, &QueryCommand::SetDisplayBrightness { level: 7 }, &mut reply);
        (ok, reply)
    });
    drive_until(&mut svc, &mut sink, || caller.is_finished());

    let (ok, reply) = caller.join().unwrap();
    assert!(ok);
    assert_eq!(reply[0], 0x42);
    assert_eq!(svc.arbiter().transport().device(DEV).commands, vec![vec![0x42, 7]]);
    assert_eq!(
        sink.count(|e| matches!(e, BusEvent::QueryCompleted { target: DEV, result: Ok(()) })),
        1
    );
}

#[test]
fn silent_device_reports_no_reply_before_caller_deadline() {
    let cfg = config(&[]);
    let mut dead = SimDevice::new(DEV);
    dead.silent = true;
    let (mut svc, client) = service(vec![dead], MemoryStreamSource::new(), &cfg);
    let mut sink = RecordingSink::new();

    let caller = thread::spawn(move || {
        let started = Instant::now();
        let result = futures_lite::future::block_on(client.query(DEV, &QueryCommand::Status));
        (result, started.elapsed())
    });
    drive_until(&mut svc, &mut sink, || caller.is_finished());

    let (result, elapsed) = caller.join().unwrap();
    assert_eq!(result, Err(QueryError::NoReply));
    assert!(elapsed < Duration::from_millis(u64::from(cfg.query_timeout_ms)));
    assert_eq!(svc.query_bridge().completed(), 1);
}

#[test]
fn undispatched_query_times_out_and_is_withdrawn() {
    let cfg = BusConfig {
        response_timeout_ms: 50,
        inter_byte_timeout_ms: 10,
        query_timeout_ms: 150,
        ..config(&[])
    };
    let (mut svc, client) = service(vec![SimDevice::new(DEV)], MemoryStreamSource::new(), &cfg);
    let mut sink = RecordingSink::new();

    // Nobody polls the bus while the caller waits.
    let result = futures_lite::future::block_on(client.query(DEV, &QueryCommand::Status));
    assert_eq!(result, Err(QueryError::Timeout));

    for now in 0..20 {
        svc.poll(now, &mut sink);
    }
    assert!(svc.arbiter().transport().opcodes_to(DEV).is_empty());
    assert_eq!(svc.query_bridge().completed(), 0);
}

#[test]
fn forwarded_command_is_wrapped_for_secondary_segment() {
    let cfg = config(&[]);
    let (mut svc, client) = service(vec![SimDevice::new(DEV)], MemoryStreamSource::new(), &cfg);
    let mut sink = RecordingSink::new();

    let command = QueryCommand::forwarded(0x05, &QueryCommand::SetDigitalOutputs { mask: 0x0F }).unwrap();
    let caller = thread::spawn(move || client.query_blocking(DEV, &command, &mut [0u8; 8]));
    drive_until(&mut svc, &mut sink, || caller.is_finished());

    assert!(caller.join().unwrap());
    let seen = &svc.arbiter().transport().device(DEV).commands;
    assert_eq!(
        seen[0],
        vec![0x50, 0x05, cfg.secondary_interface_address, 2, 0x40, 0x0F]
    );
}

#[test]
fn broadcast_query_completes_without_reply() {
    let cfg = config(&[]);
    let (mut svc, client) = service(
        vec![SimDevice::new(DEV), SimDevice::new(DEV + 1)],
        MemoryStreamSource::new(),
        &cfg,
    );
    let mut sink = RecordingSink::new();

    let caller = thread::spawn(move || {
        client.query_blocking(BROADCAST, &QueryCommand::SetSystemId { system_id: 0x1234 }, &mut [])
    });
    drive_until(&mut svc, &mut sink, || caller.is_finished());

    assert!(caller.join().unwrap());
    let bus = svc.arbiter().transport();
    for dev in [DEV, DEV + 1] {
        assert!(bus.device(dev).commands.contains(&vec![0x43, 0x12, 0x34]));
    }
    assert_eq!(svc.arbiter().lease_holder(), None);
}
