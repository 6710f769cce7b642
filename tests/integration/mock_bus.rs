//! Simulated field bus for integration tests.
//!
//! [`SimBus`] implements [`Transport`]: every frame the master writes is
//! decoded and offered to the attached [`SimDevice`]s, whose replies are
//! queued for the next read.  Devices answer instantly, so one poll sends
//! and the next poll sees the reply.

use std::collections::VecDeque;

use busmaster::adapters::memory::{MemoryStreamSource, RingRecordStore};
use busmaster::app::events::BusEvent;
use busmaster::app::ports::{CalendarTime, EventSink, LOG_RECORD_LEN, LogRecord, WallClock};
use busmaster::app::service::BusService;
use busmaster::bus::Transport;
use busmaster::clients::QueryClient;
use busmaster::config::BusConfig;
use busmaster::protocol::frame::{Frame, FrameKind, parse};
use busmaster::protocol::Opcode;

pub const MASTER: u16 = 0x0001;
pub const BROADCAST: u16 = 0xFFFF;

// ── Simulated device ─────────────────────────────────────────

/// A completed artifact as the device saw it.
#[derive(Debug, Clone, PartialEq)]
pub struct Received {
    pub artifact: u8,
    pub index: u8,
    pub announced_size: u32,
    pub announced_checksum: u32,
    pub data: Vec<u8>,
}

pub struct SimDevice {
    pub address: u16,
    /// Never answers anything.
    pub silent: bool,
    /// Bootloader reply convention (`[op, status]`) instead of ACK/NAK.
    pub bootloader: bool,
    /// NAK this data sequence once, asking for it again.
    pub nak_seq_once: Option<u16>,
    /// NAK every transfer start.
    pub refuse_start: bool,
    /// Drop the reply to this many log requests.
    pub swallow_log_requests: u32,
    pub logs: VecDeque<LogRecord>,
    pub received: Vec<Received>,
    /// Payloads of every other command, RTC broadcasts excluded.
    pub commands: Vec<Vec<u8>>,
    pub rtc: Vec<Vec<u8>>,
    current: Option<Received>,
    expected_seq: u16,
}

#[allow(dead_code)]
impl SimDevice {
    pub fn new(address: u16) -> Self {
        Self {
            address,
            silent: false,
            bootloader: false,
            nak_seq_once: None,
            refuse_start: false,
            swallow_log_requests: 0,
            logs: VecDeque::new(),
            received: Vec::new(),
            commands: Vec::new(),
            rtc: Vec::new(),
            current: None,
            expected_seq: 1,
        }
    }

    pub fn with_logs(mut self, event_codes: &[u8]) -> Self {
        for &code in event_codes {
            let mut record = [0u8; LOG_RECORD_LEN];
            // Devices report a bogus address; the master overwrites it.
            record[0] = 0xEE;
            record[1] = 0xEE;
            record[2] = code;
            record[3] = 0x5A;
            self.logs.push_back(record);
        }
        self
    }

    fn ack(&self, payload: &[u8]) -> Option<Vec<u8>> {
        self.reply(FrameKind::Ack, payload)
    }

    fn nak(&self, payload: &[u8]) -> Option<Vec<u8>> {
        self.reply(FrameKind::Nak, payload)
    }

    fn reply(&self, kind: FrameKind, payload: &[u8]) -> Option<Vec<u8>> {
        let frame = Frame::new(kind, MASTER, self.address, payload).ok()?;
        Some(frame.encode().to_vec())
    }

    fn transfer_reply(&self, op: u8, ok: bool, seq: Option<u16>) -> Option<Vec<u8>> {
        let mut payload = vec![op];
        if self.bootloader {
            payload.push(u8::from(!ok));
            if let Some(seq) = seq.filter(|_| !ok) {
                payload.extend_from_slice(&seq.to_be_bytes());
            }
            return self.reply(FrameKind::Command, &payload);
        }
        if let Some(seq) = seq {
            payload.extend_from_slice(&seq.to_be_bytes());
        }
        if ok { self.ack(&payload) } else { self.nak(&payload) }
    }

    /// Handle one frame addressed to this device; returns the reply bytes.
    pub fn handle(&mut self, kind: FrameKind, payload: &[u8]) -> Option<Vec<u8>> {
        if self.silent {
            return None;
        }
        let op = *payload.first()?;
        match Opcode::from_u8(op)? {
            Opcode::StatusQuery => self.ack(&[op, self.logs.len() as u8]),
            Opcode::LogQuery => {
                if self.swallow_log_requests > 0 {
                    self.swallow_log_requests -= 1;
                    return None;
                }
                let record = *self.logs.front()?;
                let mut reply = vec![op];
                reply.extend_from_slice(&record);
                self.ack(&reply)
            }
            Opcode::LogDelete => {
                self.logs.pop_front();
                None
            }
            Opcode::RtcSet => {
                self.rtc.push(payload.to_vec());
                None
            }
            Opcode::TransferStart => {
                if self.refuse_start || payload.len() < 11 {
                    return self.transfer_reply(op, false, None);
                }
                self.current = Some(Received {
                    artifact: payload[1],
                    index: payload[2],
                    announced_size: u32::from_be_bytes([payload[3], payload[4], payload[5], payload[6]]),
                    announced_checksum: u32::from_be_bytes([payload[7], payload[8], payload[9], payload[10]]),
                    data: Vec::new(),
                });
                self.expected_seq = 1;
                self.transfer_reply(op, true, None)
            }
            Opcode::TransferData if kind == FrameKind::Data && payload.len() >= 3 => {
                let seq = u16::from_be_bytes([payload[1], payload[2]]);
                if self.nak_seq_once == Some(seq) {
                    self.nak_seq_once = None;
                    return self.transfer_reply(op, false, Some(seq));
                }
                if seq != self.expected_seq {
                    return self.transfer_reply(op, false, Some(self.expected_seq));
                }
                self.current.as_mut()?.data.extend_from_slice(&payload[3..]);
                self.expected_seq += 1;
                self.transfer_reply(op, true, Some(seq))
            }
            Opcode::TransferFinish => {
                let done = self.current.take()?;
                let ok = done.data.len() as u32 == done.announced_size;
                self.received.push(done);
                self.transfer_reply(op, ok, None)
            }
            _ => {
                self.commands.push(payload.to_vec());
                self.ack(&[op])
            }
        }
    }
}

// ── Simulated wire ───────────────────────────────────────────

#[derive(Default)]
pub struct SimBus {
    pub devices: Vec<SimDevice>,
    /// Every frame the master put on the wire, in order.
    pub sent: Vec<Vec<u8>>,
    /// Raw bytes injected ahead of the next reply.
    pub noise: Vec<u8>,
    rx: VecDeque<u8>,
}

#[allow(dead_code)]
impl SimBus {
    pub fn new(devices: Vec<SimDevice>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    pub fn device(&self, address: u16) -> &SimDevice {
        self.devices
            .iter()
            .find(|d| d.address == address)
            .expect("no such simulated device")
    }

    pub fn device_mut(&mut self, address: u16) -> &mut SimDevice {
        self.devices
            .iter_mut()
            .find(|d| d.address == address)
            .expect("no such simulated device")
    }

    /// Opcodes of every frame sent to `target`, in order.
    pub fn opcodes_to(&self, target: u16) -> Vec<u8> {
        self.sent
            .iter()
            .filter_map(|raw| parse(raw).ok())
            .filter(|f| f.target() == target)
            .filter_map(|f| f.opcode())
            .collect()
    }
}

impl Transport for SimBus {
    type Error = ();

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, ()> {
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, ()> {
        self.sent.push(data.to_vec());
        let Ok(frame) = parse(data) else {
            return Ok(data.len());
        };
        let (kind, target, payload) = (frame.kind(), frame.target(), frame.payload().to_vec());
        for device in &mut self.devices {
            if target != device.address && target != BROADCAST {
                continue;
            }
            if let Some(reply) = device.handle(kind, &payload) {
                self.rx.extend(self.noise.drain(..));
                self.rx.extend(reply);
            }
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> Result<(), ()> {
        Ok(())
    }

    fn available(&self) -> bool {
        !self.rx.is_empty()
    }
}

// ── Other ports ──────────────────────────────────────────────

pub struct FixedWallClock;

impl WallClock for FixedWallClock {
    fn now(&self) -> Option<CalendarTime> {
        Some(CalendarTime {
            year: 2025,
            month: 3,
            day: 14,
            weekday: 5,
            hour: 15,
            minute: 9,
            second: 26,
        })
    }
}

/// Event sink that keeps everything for later assertions.
#[derive(Default)]
pub struct RecordingSink {
    pub events: Vec<BusEvent>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, pred: impl Fn(&BusEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &BusEvent) {
        self.events.push(event.clone());
    }
}

// ── Service harness ──────────────────────────────────────────

pub type Service = BusService<SimBus, MemoryStreamSource, RingRecordStore<64>, FixedWallClock>;

/// Test configuration: master at [`MASTER`], no turnaround guard.
pub fn config(roster: &[u16]) -> BusConfig {
    let mut config = BusConfig {
        interface_address: MASTER,
        broadcast_address: BROADCAST,
        turnaround_ms: 0,
        poll_quiet_ms: 0,
        ..BusConfig::default()
    };
    for &address in roster {
        config.roster.push(address).expect("roster overflow");
    }
    config
}

pub fn service(devices: Vec<SimDevice>, source: MemoryStreamSource, config: &BusConfig) -> (Service, QueryClient) {
    BusService::new(SimBus::new(devices), source, RingRecordStore::new(), FixedWallClock, config)
        .expect("valid test configuration")
}

/// Poll once per millisecond for `ms` milliseconds starting at `*now`.
pub fn run(svc: &mut Service, sink: &mut RecordingSink, now: &mut u64, ms: u64) {
    for _ in 0..ms {
        svc.poll(*now, sink);
        *now += 1;
    }
}
