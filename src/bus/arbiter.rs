//! Bus Arbiter: exclusive owner of the physical channel.
//!
//! ```text
//!           offer_work() → sent, expects reply
//!   ┌──────┐ ───────────────────────────────▶ ┌───────────────┐
//!   │ Idle │                                  │ AwaitingReply │
//!   └──────┘ ◀───────── reply consumed ────── └───────────────┘
//!     ▲  ▲                                      │ first byte ▲
//!     │  │ broadcast sent                       ▼            │ bad frame
//!     │  └──────────────(Sending)          ┌───────────┐     │
//!     │                                    │ Receiving │─────┘
//!     │        ┌──────────┐  timeout /     └───────────┘
//!     └────────│ TimedOut │◀─ inter-byte gap ────┘
//!              └──────────┘
//! ```
//!
//! [`BusArbiter::poll`] never blocks.  Each call either dispatches (Idle),
//! drains inbound bytes and routes complete frames to the lease holder, or
//! detects a timeout.  Managers are visited in slice order, so the order of
//! the slice passed to `poll` is the dispatch priority.

use log::{debug, trace, warn};

use super::lease::{ClientManager, Disposition, Expect, Lease};
use super::transport::Transport;
use crate::config::BusConfig;
use crate::error::FrameError;
use crate::protocol::frame::{FrameAssembler, FrameBuf, parse, validate};

const RX_CHUNK: usize = 64;

/// What became of one assembled frame.
enum Verdict {
    Consumed,
    Ignored,
    FalseStart,
    Rejected(FrameError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Idle,
    Sending,
    AwaitingReply,
    Receiving,
    TimedOut,
}

/// Line counters since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    pub frames_sent: u32,
    pub frames_delivered: u32,
    pub replies_ignored: u32,
    pub framing_errors: u32,
    pub checksum_errors: u32,
    pub foreign_frames: u32,
    pub timeouts: u32,
    pub inter_byte_aborts: u32,
    /// Replies recovered by replaying a false start after a line gap.
    pub resyncs: u32,
    pub read_errors: u32,
}

pub struct BusArbiter<T: Transport> {
    transport: T,
    own_address: u16,
    response_timeout_ms: u64,
    inter_byte_timeout_ms: u64,
    turnaround_ms: u64,

    state: BusState,
    holder: Option<usize>,
    sent_at: u64,
    last_byte_at: u64,
    quiet_until: u64,
    last_poll_ms: u64,

    assembler: FrameAssembler,
    scratch: FrameBuf,
    stats: BusStats,
}

impl<T: Transport> BusArbiter<T> {
    pub fn new(transport: T, config: &BusConfig) -> Self {
        Self {
            transport,
            own_address: config.interface_address,
            response_timeout_ms: u64::from(config.response_timeout_ms),
            inter_byte_timeout_ms: u64::from(config.inter_byte_timeout_ms),
            turnaround_ms: u64::from(config.turnaround_ms),
            state: BusState::Idle,
            holder: None,
            sent_at: 0,
            last_byte_at: 0,
            quiet_until: 0,
            last_poll_ms: 0,
            assembler: FrameAssembler::new(),
            scratch: FrameBuf::new(),
            stats: BusStats::default(),
        }
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    /// Priority index of the manager holding the lease, if any.
    pub fn lease_holder(&self) -> Option<usize> {
        self.holder
    }

    pub fn stats(&self) -> BusStats {
        self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Drop the lease held by `index` without calling it back.
    ///
    /// Used when a manager is cancelled mid-transaction.  A late reply is
    /// drained as idle traffic, and the turnaround guard runs from the last
    /// poll so the next lease does not talk over it.  Returns whether a lease
    /// was dropped.
    pub fn revoke(&mut self, index: usize) -> bool {
        if self.holder != Some(index) {
            return false;
        }
        debug!("bus: lease of #{} revoked", index);
        self.finish(self.last_poll_ms);
        true
    }

    /// Run one non-blocking step of the dispatch loop.
    pub fn poll(&mut self, clients: &mut [&mut dyn ClientManager], now_ms: u64) {
        self.last_poll_ms = now_ms;
        match self.state {
            BusState::TimedOut | BusState::Sending => {
                self.state = BusState::Idle;
                self.idle(clients, now_ms);
            }
            BusState::Idle => self.idle(clients, now_ms),
            BusState::AwaitingReply | BusState::Receiving => self.receive(clients, now_ms),
        }
    }

    // ── Idle: drain stray traffic, then dispatch ─────────────

    fn idle(&mut self, clients: &mut [&mut dyn ClientManager], now_ms: u64) {
        self.drain_stray();
        if now_ms < self.quiet_until {
            return;
        }
        self.dispatch(clients, now_ms);
    }

    fn drain_stray(&mut self) {
        let mut buf = [0u8; RX_CHUNK];
        loop {
            match self.transport.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => trace!("bus: {} stray bytes while idle", n),
                Err(e) => {
                    warn!("bus: read failed while idle: {:?}", e);
                    self.stats.read_errors += 1;
                    break;
                }
            }
        }
        self.assembler.reset();
    }

    fn dispatch(&mut self, clients: &mut [&mut dyn ClientManager], now_ms: u64) {
        for (index, client) in clients.iter_mut().enumerate() {
            self.state = BusState::Sending;
            let outcome = {
                let mut lease = Lease::new(&mut self.transport, self.own_address, &mut self.scratch);
                client.offer_work(&mut lease, now_ms);
                lease.outcome()
            };
            match outcome {
                None => {}
                Some(Expect::Reply) => {
                    self.stats.frames_sent += 1;
                    self.holder = Some(index);
                    self.sent_at = now_ms;
                    self.last_byte_at = now_ms;
                    self.assembler.reset();
                    self.state = BusState::AwaitingReply;
                    trace!("bus: lease -> {} (#{})", client.name(), index);
                    return;
                }
                Some(Expect::Nothing) => {
                    self.stats.frames_sent += 1;
                    self.finish(now_ms);
                    trace!("bus: {} (#{}) sent without reply", client.name(), index);
                    return;
                }
            }
        }
        self.state = BusState::Idle;
    }

    // ── Awaiting reply: assemble, validate, route ────────────

    /// Drain inbound bytes and route complete frames to the lease holder.
    ///
    /// Only a frame the holder consumes ends the transaction early.  Foreign,
    /// corrupt and ignored frames are counted and dropped while the lease
    /// stays in place: on a shared line they are other traffic or noise, and
    /// the real reply may still follow before the response timeout.
    fn receive(&mut self, clients: &mut [&mut dyn ClientManager], now_ms: u64) {
        let Some(index) = self.holder else {
            self.state = BusState::Idle;
            return;
        };
        let Some(client) = clients.get_mut(index) else {
            warn!("bus: lease holder #{} is not registered", index);
            self.finish(now_ms);
            return;
        };

        let mut buf = [0u8; RX_CHUNK];
        loop {
            let n = match self.transport.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("bus: read failed: {:?}", e);
                    self.stats.read_errors += 1;
                    break;
                }
            };
            self.last_byte_at = now_ms;
            for &byte in &buf[..n] {
                self.assembler.feed(byte);
                if self.route(&mut **client, now_ms) {
                    self.finish(now_ms);
                    return;
                }
            }
        }

        let expired = now_ms.saturating_sub(self.sent_at) >= self.response_timeout_ms;
        if self.assembler.is_partial() {
            self.state = BusState::Receiving;
            let gap = now_ms.saturating_sub(self.last_byte_at) >= self.inter_byte_timeout_ms;
            if !gap && !expired {
                return;
            }
            // A stalled candidate may be a false start hiding a complete reply.
            while self.assembler.is_partial() {
                self.assembler.rewind();
                if self.route(&mut **client, now_ms) {
                    self.stats.resyncs += 1;
                    self.finish(now_ms);
                    return;
                }
            }
            if gap {
                warn!("bus: inter-byte gap, partial frame aborted");
                self.stats.inter_byte_aborts += 1;
                self.time_out(index, clients, now_ms);
                return;
            }
        } else {
            self.state = BusState::AwaitingReply;
        }

        if expired {
            self.time_out(index, clients, now_ms);
        }
    }

    /// Assemble every queued byte.  True once the holder consumes a frame.
    fn route(&mut self, client: &mut dyn ClientManager, now_ms: u64) -> bool {
        loop {
            let verdict = {
                let Some(raw) = self.assembler.next_frame() else {
                    return false;
                };
                match validate(raw, self.own_address) {
                    Ok(view) => match client.handle_response(&view, now_ms) {
                        Disposition::Consumed => Verdict::Consumed,
                        Disposition::Ignored => {
                            debug!("bus: {} ignored frame from {:#06x}", client.name(), view.source());
                            Verdict::Ignored
                        }
                    },
                    // A real foreign frame checks out; a false start rarely does.
                    Err(FrameError::ForeignTarget) if parse(raw).is_err() => Verdict::FalseStart,
                    Err(e) => Verdict::Rejected(e),
                }
            };
            match verdict {
                Verdict::Consumed => {
                    self.stats.frames_delivered += 1;
                    return true;
                }
                Verdict::Ignored => self.stats.replies_ignored += 1,
                Verdict::Rejected(FrameError::ForeignTarget) => {
                    debug!("bus: frame for another interface dropped");
                    self.stats.foreign_frames += 1;
                }
                Verdict::Rejected(FrameError::ChecksumMismatch) => {
                    warn!("bus: checksum mismatch, frame dropped");
                    self.stats.checksum_errors += 1;
                }
                Verdict::FalseStart => {
                    debug!("bus: false frame start, rescanning");
                    self.stats.framing_errors += 1;
                    self.assembler.rewind();
                }
                Verdict::Rejected(e) => {
                    warn!("bus: malformed frame dropped: {}", e);
                    self.stats.framing_errors += 1;
                    self.assembler.rewind();
                }
            }
        }
    }

    fn time_out(&mut self, index: usize, clients: &mut [&mut dyn ClientManager], now_ms: u64) {
        self.stats.timeouts += 1;
        if let Some(client) = clients.get_mut(index) {
            debug!("bus: {} timed out", client.name());
            client.handle_timeout(now_ms);
        }
        self.finish(now_ms);
        self.state = BusState::TimedOut;
    }

    /// Release the lease and start the turnaround guard.
    fn finish(&mut self, now_ms: u64) {
        self.holder = None;
        self.assembler.reset();
        self.quiet_until = now_ms + self.turnaround_ms;
        self.state = BusState::Idle;
    }
}

// ── Tests ────────────────────────────────────────────────────
