//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing bus events to the ESP-IDF logger
//! (UART / USB-CDC in production, stderr on the host).

use log::{info, warn};

use crate::app::events::BusEvent;
use crate::app::ports::EventSink;
use crate::clients::transfer::TransferOutcome;

/// Adapter that logs every [`BusEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &BusEvent) {
        match event {
            BusEvent::TransferStarted {
                manager,
                target,
                artifact,
                index,
                size,
            } => {
                info!(
                    "XFER  | {} start {:?}#{} -> {:#06x} ({} bytes)",
                    manager, artifact, index, target, size
                );
            }
            BusEvent::TransferCompleted {
                manager,
                target,
                artifact,
                index,
            } => {
                info!("XFER  | {} done {:?}#{} -> {:#06x}", manager, artifact, index, target);
            }
            BusEvent::TransferFailed {
                manager,
                target,
                index,
                error,
            } => {
                warn!("XFER  | {} failed #{} -> {:#06x}: {}", manager, index, target, error);
            }
            BusEvent::CampaignFinished { manager, outcome } => match outcome {
                TransferOutcome::Completed { pairs } => {
                    info!("XFER  | {} campaign complete, {} transfers", manager, pairs);
                }
                TransferOutcome::Failed(e) => warn!("XFER  | {} campaign aborted: {}", manager, e),
                TransferOutcome::Cancelled => info!("XFER  | {} campaign cancelled", manager),
            },
            BusEvent::LogStored { device, event_code } => {
                info!("POLL  | log from {:#06x}, event {:#04x}", device, event_code);
            }
            BusEvent::LogStoreFailed { device, error } => {
                warn!("POLL  | log from {:#06x} could not be stored: {}", device, error);
            }
            BusEvent::PollCycleCompleted { cycle } => {
                info!("POLL  | cycle {} complete", cycle);
            }
            BusEvent::TimeBroadcast(t) => {
                info!(
                    "TIME  | {:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    t.year, t.month, t.day, t.hour, t.minute, t.second
                );
            }
            BusEvent::QueryCompleted { target, result } => match result {
                Ok(()) => info!("QUERY | {:#06x} ok", target),
                Err(e) => warn!("QUERY | {:#06x} {}", target, e),
            },
        }
    }
}
