//! Round-robin log harvesting across the device roster.
//!
//! Per device:
//!
//! ```text
//!  status? ──▶ pending = 0 / no reply ──────────────────────▶ next device
//!     │
//!     └─ pending > 0 ─▶ log? ─▶ store ─▶ delete (no reply) ─▶ status? (same device)
//!                        │
//!                        └─ no reply: retry, then next device
//! ```
//!
//! The delete goes out only after the record is safely stored, so a store
//! failure leaves the log on the device for a later cycle.

use log::{debug, info, warn};

use crate::app::events::{BusEvent, EventQueue};
use crate::app::ports::{LOG_RECORD_LEN, LogRecord, RecordStore};
use crate::bus::{ClientManager, Disposition, Lease};
use crate::config::{BusConfig, Roster};
use crate::protocol::frame::FrameKind;
use crate::protocol::{FrameView, Opcode};

/// Offset of the record inside a log reply payload.
const RECORD_OFFSET: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Next transmission is a status query.
    Idle,
    AwaitingStatus,
    /// Next transmission is a log request.
    FetchLog,
    AwaitingLog,
    /// Next transmission is the delete notice for the stored record.
    PendingDelete,
}

pub struct LogPollManager<R: RecordStore> {
    store: R,
    roster: Roster,
    index: usize,
    target: u16,
    phase: PollPhase,
    retries: u8,
    retry_budget: u8,
    quiet_ms: u64,
    last_activity: Option<u64>,
    running: bool,
    cycle: u32,
    events: EventQueue,
}

impl<R: RecordStore> LogPollManager<R> {
    pub fn new(store: R, config: &BusConfig) -> Self {
        Self {
            store,
            roster: config.roster.clone(),
            index: 0,
            target: config.roster.first().copied().unwrap_or(0),
            phase: PollPhase::Idle,
            retries: 0,
            retry_budget: config.log_retries,
            quiet_ms: u64::from(config.poll_quiet_ms),
            last_activity: None,
            running: true,
            cycle: 0,
            events: EventQueue::new(),
        }
    }

    pub fn start(&mut self) {
        if !self.running {
            info!("POLL: started ({} devices)", self.roster.len());
        }
        self.running = true;
    }

    /// Suspend polling.  The caller revokes this manager's lease if held.
    pub fn stop(&mut self) -> bool {
        let was = self.running;
        self.running = false;
        self.phase = PollPhase::Idle;
        self.retries = 0;
        if was {
            info!("POLL: stopped at {:#06x}", self.target);
        }
        was
    }

    pub fn is_active(&self) -> bool {
        self.running && !self.roster.is_empty()
    }

    /// Replace the roster and restart at its first device.
    pub fn load_roster(&mut self, roster: Roster) {
        info!("POLL: roster loaded ({} devices)", roster.len());
        self.target = roster.first().copied().unwrap_or(0);
        self.roster = roster;
        self.index = 0;
        self.phase = PollPhase::Idle;
        self.retries = 0;
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    /// Roster position of the device being polled.
    pub fn current_index(&self) -> usize {
        self.index
    }

    pub fn current_target(&self) -> u16 {
        self.target
    }

    /// Completed passes over the roster.
    pub fn cycles(&self) -> u32 {
        self.cycle
    }

    pub fn store(&self) -> &R {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut R {
        &mut self.store
    }

    pub fn events(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    fn advance(&mut self) {
        self.phase = PollPhase::Idle;
        self.retries = 0;
        self.index += 1;
        if self.index >= self.roster.len() {
            self.index = 0;
            self.cycle = self.cycle.wrapping_add(1);
            debug!("POLL: cycle {} complete", self.cycle);
            self.events.push(BusEvent::PollCycleCompleted { cycle: self.cycle });
        }
    }

    fn quiet(&self, now_ms: u64) -> bool {
        self.last_activity
            .is_some_and(|t| now_ms.saturating_sub(t) < self.quiet_ms)
    }

    fn store_record(&mut self, frame: &FrameView<'_>) -> bool {
        let Some(raw) = frame.bytes_at(RECORD_OFFSET, LOG_RECORD_LEN) else {
            return false;
        };
        let mut record: LogRecord = [0; LOG_RECORD_LEN];
        record.copy_from_slice(raw);
        // The device-reported address is not trusted; byte 2 (event code)
        // is kept as received.
        record[0..2].copy_from_slice(&self.target.to_be_bytes());
        let event_code = record[2];
        match self.store.append(&record) {
            Ok(()) => {
                debug!("POLL: {:#06x} log stored (event {:#04x})", self.target, event_code);
                self.events.push(BusEvent::LogStored {
                    device: self.target,
                    event_code,
                });
                self.phase = PollPhase::PendingDelete;
            }
            Err(e) => {
                // No delete: the record stays on the device for a later cycle.
                warn!("POLL: {:#06x} log not stored: {}", self.target, e);
                self.events.push(BusEvent::LogStoreFailed {
                    device: self.target,
                    error: e,
                });
                self.advance();
            }
        }
        true
    }

    fn log_retry_or_advance(&mut self) {
        if self.retries < self.retry_budget {
            self.retries += 1;
            warn!(
                "POLL: {:#06x} log retry {}/{}",
                self.target, self.retries, self.retry_budget
            );
            self.phase = PollPhase::FetchLog;
        } else {
            warn!("POLL: {:#06x} log not retrieved, moving on", self.target);
            self.advance();
        }
    }
}

impl<R: RecordStore> ClientManager for LogPollManager<R> {
    fn name(&self) -> &'static str {
        "POLL"
    }

    fn offer_work(&mut self, lease: &mut Lease<'_>, now_ms: u64) {
        if !self.is_active() || self.quiet(now_ms) {
            return;
        }
        if self.phase == PollPhase::Idle {
            self.target = self.roster.get(self.index).copied().unwrap_or(0);
        }
        let target = self.target;
        match self.phase {
            PollPhase::Idle => match lease.request(FrameKind::Command, target, &[Opcode::StatusQuery.code()]) {
                Ok(()) => self.phase = PollPhase::AwaitingStatus,
                Err(e) => {
                    warn!("POLL: status send to {:#06x} failed: {}", target, e);
                    self.advance();
                }
            },
            PollPhase::FetchLog => match lease.request(FrameKind::Command, target, &[Opcode::LogQuery.code()]) {
                Ok(()) => self.phase = PollPhase::AwaitingLog,
                Err(e) => {
                    warn!("POLL: log send to {:#06x} failed: {}", target, e);
                    self.log_retry_or_advance();
                }
            },
            PollPhase::PendingDelete => {
                match lease.notify(FrameKind::Command, target, &[Opcode::LogDelete.code()]) {
                    // Re-query the same device to drain further logs.
                    Ok(()) => self.phase = PollPhase::Idle,
                    Err(e) => {
                        warn!("POLL: delete send to {:#06x} failed: {}", target, e);
                        self.advance();
                    }
                }
            }
            PollPhase::AwaitingStatus | PollPhase::AwaitingLog => return,
        }
        self.last_activity = Some(now_ms);
    }

    fn handle_response(&mut self, frame: &FrameView<'_>, now_ms: u64) -> Disposition {
        if frame.source() != self.target {
            return Disposition::Ignored;
        }
        match self.phase {
            PollPhase::AwaitingStatus => {
                if frame.opcode() != Some(Opcode::StatusQuery.code()) {
                    debug!("POLL: {:#06x} stray reply while awaiting status", self.target);
                    return Disposition::Ignored;
                }
                let pending = frame.u8_at(1).unwrap_or(0);
                if pending > 0 {
                    debug!("POLL: {:#06x} has {} pending", self.target, pending);
                    self.retries = 0;
                    self.phase = PollPhase::FetchLog;
                } else {
                    self.advance();
                }
            }
            PollPhase::AwaitingLog => {
                let stored = frame.opcode() == Some(Opcode::LogQuery.code()) && self.store_record(frame);
                if !stored {
                    warn!("POLL: {:#06x} malformed log reply", self.target);
                    self.log_retry_or_advance();
                }
            }
            _ => return Disposition::Ignored,
        }
        self.last_activity = Some(now_ms);
        Disposition::Consumed
    }

    fn handle_timeout(&mut self, now_ms: u64) {
        match self.phase {
            PollPhase::AwaitingStatus => {
                debug!("POLL: {:#06x} silent", self.target);
                self.advance();
            }
            PollPhase::AwaitingLog => self.log_retry_or_advance(),
            _ => {}
        }
        self.last_activity = Some(now_ms);
    }
}

// ── Tests ────────────────────────────────────────────────────
