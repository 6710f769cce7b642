//! Outbound bus events.
//!
//! Managers queue these in their own [`EventQueue`]; the
//! [`BusService`](super::service::BusService) drains every queue into the
//! [`EventSink`](super::ports::EventSink) port after each poll.  Adapters on
//! the other side decide what to do with them (log line, web status page,
//! upstream telemetry).

use heapless::Deque;

use super::ports::{CalendarTime, EventSink};
use crate::clients::query::QueryError;
use crate::clients::transfer::{ArtifactKind, TransferError, TransferOutcome};
use crate::error::StoreError;

/// Events buffered per manager between two drains.
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// Structured events emitted by the bus core.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    /// A transfer to one (device, artifact) pair began.
    TransferStarted {
        manager: &'static str,
        target: u16,
        artifact: ArtifactKind,
        index: u8,
        size: u32,
    },

    /// One (device, artifact) pair was accepted by the device.
    TransferCompleted {
        manager: &'static str,
        target: u16,
        artifact: ArtifactKind,
        index: u8,
    },

    /// A pair failed; the rest of the campaign is abandoned.
    TransferFailed {
        manager: &'static str,
        target: u16,
        index: u8,
        error: TransferError,
    },

    /// A campaign reached its terminal outcome.
    CampaignFinished {
        manager: &'static str,
        outcome: TransferOutcome,
    },

    /// A device log record was harvested into the store.
    LogStored { device: u16, event_code: u8 },

    /// The record store refused a harvested record.
    LogStoreFailed { device: u16, error: StoreError },

    /// The poller wrapped around the roster.
    PollCycleCompleted { cycle: u32 },

    /// An RTC broadcast went out.
    TimeBroadcast(CalendarTime),

    /// A synchronous query reached its terminal state.
    QueryCompleted {
        target: u16,
        result: Result<(), QueryError>,
    },
}

/// Bounded FIFO of pending events; the oldest is dropped on overflow.
pub struct EventQueue {
    events: Deque<BusEvent, EVENT_QUEUE_DEPTH>,
    dropped: u32,
}

impl EventQueue {
    pub const fn new() -> Self {
        Self {
            events: Deque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, event: BusEvent) {
        if self.events.is_full() {
            self.events.pop_front();
            self.dropped = self.dropped.wrapping_add(1);
        }
        // Room was made above.
        let _ = self.events.push_back(event);
    }

    pub fn pop(&mut self) -> Option<BusEvent> {
        self.events.pop_front()
    }

    /// Hand every queued event to `sink`, oldest first.
    pub fn drain_into(&mut self, sink: &mut dyn EventSink) {
        while let Some(event) = self.events.pop_front() {
            sink.emit(&event);
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events lost to overflow since construction.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_drops_oldest() {
        let mut q = EventQueue::new();
        for cycle in 0..(EVENT_QUEUE_DEPTH as u32 + 2) {
            q.push(BusEvent::PollCycleCompleted { cycle });
        }
        assert_eq!(q.len(), EVENT_QUEUE_DEPTH);
        assert_eq!(q.dropped(), 2);
        assert_eq!(q.pop(), Some(BusEvent::PollCycleCompleted { cycle: 2 }));
    }

    #[test]
    fn drain_preserves_order() {
        struct Collect(std::vec::Vec<BusEvent>);
        impl EventSink for Collect {
            fn emit(&mut self, event: &BusEvent) {
                self.0.push(event.clone());
            }
        }
        let mut q = EventQueue::new();
        q.push(BusEvent::LogStored { device: 1, event_code: 7 });
        q.push(BusEvent::PollCycleCompleted { cycle: 1 });
        let mut sink = Collect(vec![]);
        q.drain_into(&mut sink);
        assert!(q.is_empty());
        assert_eq!(sink.0.len(), 2);
        assert!(matches!(sink.0[0], BusEvent::LogStored { device: 1, .. }));
    }
}
