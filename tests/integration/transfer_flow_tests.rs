//! End-to-end transfer campaigns over the simulated bus.

use super::mock_bus::{RecordingSink, SimDevice, config, run, service};

use busmaster::adapters::memory::{MemoryStreamSource, artifact_checksum};
use busmaster::app::commands::{BusCommand, TransferSlot};
use busmaster::app::events::BusEvent;
use busmaster::clients::{
    ArtifactKind, ProtocolVariant, TransferError, TransferOutcome, TransferRequest, TransferState,
};
use busmaster::protocol::Opcode;

const DEV_A: u16 = 0x0120;
const DEV_B: u16 = 0x0121;

fn image(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

fn start(slot: TransferSlot, request: TransferRequest) -> BusCommand {
    BusCommand::StartTransfer { slot, request }
}

#[test]
fn campaign_delivers_every_pair_in_order() {
    let mut source = MemoryStreamSource::new();
    source.insert("image_00.bin", image(300, 1));
    source.insert("image_01.bin", image(129, 2));
    let cfg = config(&[]);
    let (mut svc, _q) = service(vec![SimDevice::new(DEV_A), SimDevice::new(DEV_B)], source, &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    let request = TransferRequest {
        variant: ProtocolVariant::Generic,
        artifact: ArtifactKind::Image,
        first_address: DEV_A,
        last_address: DEV_B,
        first_index: 0,
        last_index: 1,
    };
    svc.handle_command(start(TransferSlot::Primary, request)).unwrap();
    run(&mut svc, &mut sink, &mut now, 200);

    let manager = svc.transfer(TransferSlot::Primary);
    assert_eq!(manager.state(), TransferState::Idle);
    assert_eq!(manager.last_outcome(), Some(TransferOutcome::Completed { pairs: 4 }));

    let bus = svc.arbiter().transport();
    for dev in [DEV_A, DEV_B] {
        let got = &bus.device(dev).received;
        assert_eq!(got.len(), 2);
        assert_eq!((got[0].artifact, got[0].index), (ArtifactKind::Image.code(), 0));
        assert_eq!(got[0].data, image(300, 1));
        assert_eq!(got[0].announced_checksum, artifact_checksum(&image(300, 1)));
        assert_eq!(got[1].index, 1);
        assert_eq!(got[1].data, image(129, 2));
    }

    let completed: Vec<(u16, u8)> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            BusEvent::TransferCompleted { target, index, .. } => Some((*target, *index)),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![(DEV_A, 0), (DEV_A, 1), (DEV_B, 0), (DEV_B, 1)]);
    assert_eq!(
        sink.count(|e| matches!(e, BusEvent::CampaignFinished { .. })),
        1
    );
}

#[test]
fn nak_with_sequence_resends_from_that_chunk() {
    let mut source = MemoryStreamSource::new();
    source.insert("firmware_00.bin", image(300, 9));
    let mut device = SimDevice::new(DEV_A);
    device.nak_seq_once = Some(2);
    let cfg = config(&[]);
    let (mut svc, _q) = service(vec![device], source, &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    svc.handle_command(start(
        TransferSlot::Primary,
        TransferRequest::single(ProtocolVariant::Generic, ArtifactKind::Firmware, DEV_A, 0),
    ))
    .unwrap();
    run(&mut svc, &mut sink, &mut now, 100);

    let bus = svc.arbiter().transport();
    assert_eq!(bus.device(DEV_A).received[0].data, image(300, 9));
    let data_frames = bus
        .opcodes_to(DEV_A)
        .into_iter()
        .filter(|&op| op == Opcode::TransferData.code())
        .count();
    assert_eq!(data_frames, 4, "seq 1, 2, 2 again, 3");
}

#[test]
fn silent_device_fails_after_retry_budget() {
    let mut source = MemoryStreamSource::new();
    source.insert("params_00.bin", image(10, 0));
    let mut device = SimDevice::new(DEV_A);
    device.silent = true;
    let cfg = config(&[]);
    let (mut svc, _q) = service(vec![device], source, &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    svc.handle_command(start(
        TransferSlot::Primary,
        TransferRequest::single(ProtocolVariant::Generic, ArtifactKind::Parameters, DEV_A, 0),
    ))
    .unwrap();
    run(&mut svc, &mut sink, &mut now, 2_000);

    let starts = svc.arbiter().transport().opcodes_to(DEV_A);
    assert_eq!(starts, vec![Opcode::TransferStart.code(); 1 + cfg.transfer_retries as usize]);
    assert_eq!(
        svc.transfer(TransferSlot::Primary).last_outcome(),
        Some(TransferOutcome::Failed(TransferError::RetriesExhausted))
    );
    assert!(svc.arbiter().stats().timeouts >= 4);
    assert_eq!(svc.arbiter().lease_holder(), None);
}

#[test]
fn refused_start_aborts_campaign() {
    let mut source = MemoryStreamSource::new();
    source.insert("image_00.bin", image(10, 0));
    let mut device = SimDevice::new(DEV_A);
    device.refuse_start = true;
    let cfg = config(&[]);
    let (mut svc, _q) = service(vec![device, SimDevice::new(DEV_B)], source, &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    let request = TransferRequest {
        last_address: DEV_B,
        ..TransferRequest::single(ProtocolVariant::Generic, ArtifactKind::Image, DEV_A, 0)
    };
    svc.handle_command(start(TransferSlot::Primary, request)).unwrap();
    run(&mut svc, &mut sink, &mut now, 100);

    assert_eq!(
        svc.transfer(TransferSlot::Primary).last_outcome(),
        Some(TransferOutcome::Failed(TransferError::StartRejected))
    );
    assert!(svc.arbiter().transport().opcodes_to(DEV_B).is_empty());
    assert_eq!(
        sink.count(|e| matches!(e, BusEvent::TransferFailed { target: DEV_A, .. })),
        1
    );
}

#[test]
fn bootloader_variant_uses_small_chunks() {
    let mut source = MemoryStreamSource::new();
    source.insert("firmware_02.bin", image(150, 4));
    let mut device = SimDevice::new(DEV_A);
    device.bootloader = true;
    let cfg = config(&[]);
    let (mut svc, _q) = service(vec![device], source, &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    svc.handle_command(start(
        TransferSlot::Secondary,
        TransferRequest::single(ProtocolVariant::Bootloader, ArtifactKind::Firmware, DEV_A, 2),
    ))
    .unwrap();
    run(&mut svc, &mut sink, &mut now, 100);

    let bus = svc.arbiter().transport();
    assert_eq!(bus.device(DEV_A).received[0].data, image(150, 4));
    let data_frames = bus
        .opcodes_to(DEV_A)
        .into_iter()
        .filter(|&op| op == Opcode::TransferData.code())
        .count();
    assert_eq!(data_frames, 3);
    assert_eq!(
        svc.transfer(TransferSlot::Secondary).last_outcome(),
        Some(TransferOutcome::Completed { pairs: 1 })
    );
}

#[test]
fn primary_finishes_before_secondary_gets_the_bus() {
    let mut source = MemoryStreamSource::new();
    source.insert("image_00.bin", image(200, 1));
    source.insert("firmware_00.bin", image(200, 2));
    let cfg = config(&[]);
    let (mut svc, _q) = service(vec![SimDevice::new(DEV_A), SimDevice::new(DEV_B)], source, &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    svc.handle_command(start(
        TransferSlot::Secondary,
        TransferRequest::single(ProtocolVariant::Generic, ArtifactKind::Firmware, DEV_B, 0),
    ))
    .unwrap();
    svc.handle_command(start(
        TransferSlot::Primary,
        TransferRequest::single(ProtocolVariant::Generic, ArtifactKind::Image, DEV_A, 0),
    ))
    .unwrap();
    run(&mut svc, &mut sink, &mut now, 200);

    let finished: Vec<&str> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            BusEvent::CampaignFinished { manager, .. } => Some(*manager),
            _ => None,
        })
        .collect();
    assert_eq!(finished, vec!["XFER-A", "XFER-B"]);
    let bus = svc.arbiter().transport();
    assert_eq!(bus.device(DEV_B).received[0].data, image(200, 2));
}

#[test]
fn stop_mid_transfer_frees_the_bus() {
    let mut source = MemoryStreamSource::new();
    source.insert("image_00.bin", image(1000, 3));
    let cfg = config(&[]);
    let (mut svc, _q) = service(vec![SimDevice::new(DEV_A)], source, &cfg);
    let mut sink = RecordingSink::new();
    let mut now = 0;

    svc.handle_command(start(
        TransferSlot::Primary,
        TransferRequest::single(ProtocolVariant::Generic, ArtifactKind::Image, DEV_A, 0),
    ))
    .unwrap();
    run(&mut svc, &mut sink, &mut now, 6);
    assert!(svc.transfer(TransferSlot::Primary).is_active());

    svc.handle_command(BusCommand::StopTransfer(TransferSlot::Primary))
        .unwrap();
    assert_eq!(svc.arbiter().lease_holder(), None);
    let sent_before = svc.arbiter().stats().frames_sent;
    run(&mut svc, &mut sink, &mut now, 20);
    assert_eq!(svc.arbiter().stats().frames_sent, sent_before);
    assert_eq!(
        svc.transfer(TransferSlot::Primary).last_outcome(),
        Some(TransferOutcome::Cancelled)
    );
}
