//! Cross-context status board.
//!
//! The bus thread republishes a compact summary after every poll; web
//! handlers and the status LED read it from any thread without touching
//! the bus.  Plain relaxed atomics: each field is independently fresh, the
//! set as a whole is not a consistent snapshot.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use crate::bus::{BusState, BusStats};
use crate::clients::transfer::{TransferProgress, TransferState};

const NO_HOLDER: u8 = u8::MAX;

#[derive(Default)]
struct TransferSlotStatus {
    state: AtomicU8,
    target: AtomicU32,
    bytes_sent: AtomicU32,
    total: AtomicU32,
}

/// Shared, lock-free bus summary.
#[derive(Default)]
pub struct StatusBoard {
    bus_state: AtomicU8,
    lease_holder: AtomicU8,
    frames_sent: AtomicU32,
    timeouts: AtomicU32,
    faults: AtomicU32,
    transfers: [TransferSlotStatus; 2],
    polling: AtomicBool,
    poll_cycles: AtomicU32,
    stored_logs: AtomicU32,
    time_broadcasts: AtomicU32,
    queries: AtomicU32,
}

/// Point-in-time copy of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub bus_state: BusState,
    pub lease_holder: Option<u8>,
    pub frames_sent: u32,
    pub timeouts: u32,
    /// Framing, checksum and inter-byte faults combined.
    pub faults: u32,
    pub transfers: [TransferSlotSnapshot; 2],
    pub polling: bool,
    pub poll_cycles: u32,
    pub stored_logs: u32,
    pub time_broadcasts: u32,
    pub queries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSlotSnapshot {
    pub state: TransferState,
    pub target: u16,
    pub bytes_sent: u32,
    pub total: u32,
}

fn bus_state_from(code: u8) -> BusState {
    match code {
        1 => BusState::Sending,
        2 => BusState::AwaitingReply,
        3 => BusState::Receiving,
        4 => BusState::TimedOut,
        _ => BusState::Idle,
    }
}

fn bus_state_code(state: BusState) -> u8 {
    match state {
        BusState::Idle => 0,
        BusState::Sending => 1,
        BusState::AwaitingReply => 2,
        BusState::Receiving => 3,
        BusState::TimedOut => 4,
    }
}

fn transfer_state_code(state: TransferState) -> u8 {
    match state {
        TransferState::Idle => 0,
        TransferState::Starting => 1,
        TransferState::AwaitingStartAck => 2,
        TransferState::SendingData => 3,
        TransferState::AwaitingDataAck => 4,
        TransferState::Finishing => 5,
        TransferState::AwaitingFinishAck => 6,
        TransferState::Completed => 7,
        TransferState::Failed => 8,
        TransferState::PendingCleanup => 9,
    }
}

fn transfer_state_from(code: u8) -> TransferState {
    match code {
        1 => TransferState::Starting,
        2 => TransferState::AwaitingStartAck,
        3 => TransferState::SendingData,
        4 => TransferState::AwaitingDataAck,
        5 => TransferState::Finishing,
        6 => TransferState::AwaitingFinishAck,
        7 => TransferState::Completed,
        8 => TransferState::Failed,
        9 => TransferState::PendingCleanup,
        _ => TransferState::Idle,
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        let board = Self::default();
        board.lease_holder.store(NO_HOLDER, Ordering::Relaxed);
        board
    }

    pub fn publish_bus(&self, state: BusState, holder: Option<usize>, stats: &BusStats) {
        self.bus_state.store(bus_state_code(state), Ordering::Relaxed);
        let holder = holder.map_or(NO_HOLDER, |h| h.min(usize::from(NO_HOLDER - 1)) as u8);
        self.lease_holder.store(holder, Ordering::Relaxed);
        self.frames_sent.store(stats.frames_sent, Ordering::Relaxed);
        self.timeouts.store(stats.timeouts, Ordering::Relaxed);
        let faults = stats
            .framing_errors
            .wrapping_add(stats.checksum_errors)
            .wrapping_add(stats.inter_byte_aborts);
        self.faults.store(faults, Ordering::Relaxed);
    }

    pub fn publish_transfer(&self, slot: usize, progress: &TransferProgress) {
        let Some(s) = self.transfers.get(slot) else {
            return;
        };
        s.state.store(transfer_state_code(progress.state), Ordering::Relaxed);
        s.target.store(u32::from(progress.target), Ordering::Relaxed);
        s.bytes_sent.store(progress.bytes_sent, Ordering::Relaxed);
        s.total.store(progress.total, Ordering::Relaxed);
    }

    pub fn publish_poll(&self, polling: bool, cycles: u32) {
        self.polling.store(polling, Ordering::Relaxed);
        self.poll_cycles.store(cycles, Ordering::Relaxed);
    }

    pub fn record_log_stored(&self) {
        self.stored_logs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_time_broadcast(&self) {
        self.time_broadcasts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let slot = |s: &TransferSlotStatus| TransferSlotSnapshot {
            state: transfer_state_from(s.state.load(Ordering::Relaxed)),
            target: s.target.load(Ordering::Relaxed) as u16,
            bytes_sent: s.bytes_sent.load(Ordering::Relaxed),
            total: s.total.load(Ordering::Relaxed),
        };
        let holder = self.lease_holder.load(Ordering::Relaxed);
        StatusSnapshot {
            bus_state: bus_state_from(self.bus_state.load(Ordering::Relaxed)),
            lease_holder: (holder != NO_HOLDER).then_some(holder),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            faults: self.faults.load(Ordering::Relaxed),
            transfers: [slot(&self.transfers[0]), slot(&self.transfers[1])],
            polling: self.polling.load(Ordering::Relaxed),
            poll_cycles: self.poll_cycles.load(Ordering::Relaxed),
            stored_logs: self.stored_logs.load(Ordering::Relaxed),
            time_broadcasts: self.time_broadcasts.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
        }
    }
}
