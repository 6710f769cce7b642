//! Inbound commands to the bus service.
//!
//! These represent actions requested by the outside world (web handlers,
//! schedulers, a maintenance console) that the
//! [`BusService`](super::service::BusService) interprets on the bus
//! context.  Synchronous device queries do not go through here; they use
//! the [`QueryClient`](crate::clients::query::QueryClient).

use crate::clients::transfer::TransferRequest;
use crate::config::Roster;

/// Which of the two transfer managers a command addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferSlot {
    /// Higher-priority instance.
    Primary,
    Secondary,
}

/// Commands that external adapters can send into the bus core.
#[derive(Debug, Clone)]
pub enum BusCommand {
    /// Begin a transfer campaign on one transfer manager.
    StartTransfer {
        slot: TransferSlot,
        request: TransferRequest,
    },

    /// Cancel the campaign on one transfer manager.
    StopTransfer(TransferSlot),

    /// Resume round-robin log polling.
    StartPolling,

    /// Suspend log polling after releasing any held lease.
    StopPolling,

    /// Replace the polled device roster.
    LoadRoster(Roster),

    /// Broadcast the wall-clock time on the next free slot.
    BroadcastTimeNow,
}
