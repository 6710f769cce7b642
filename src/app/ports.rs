//! Port traits: the hexagonal boundary between bus logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Managers / BusService (domain)
//! ```
//!
//! Driven adapters (artifact storage, log store, clocks, event sinks)
//! implement these traits.  The managers consume them via generics, so the
//! bus core never touches a filesystem or an RTC directly.
//!
//! All calls are synchronous and must return promptly: they run on the bus
//! context between two polls.

use crate::error::{StoreError, StreamError};

// ───────────────────────────────────────────────────────────────
// Stream source port (driven adapter: artifact storage → transfer)
// ───────────────────────────────────────────────────────────────

/// An open artifact: known length, precomputed checksum, sequential reads
/// and random reseek.
pub trait SourceStream {
    /// Total artifact length in bytes.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Integrity checksum announced in the transfer start frame.
    fn checksum(&self) -> u32;

    /// Read the next bytes into `buf`.  Returns the count read; 0 at end.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Move the read position to `offset` bytes from the start.
    fn seek(&mut self, offset: u32) -> Result<(), StreamError>;
}

/// Opens artifacts by logical name.
pub trait StreamSource {
    type Stream: SourceStream;

    fn open(&mut self, name: &str) -> Result<Self::Stream, StreamError>;
}

// ───────────────────────────────────────────────────────────────
// Record store port (driven adapter: log poller → persistent log)
// ───────────────────────────────────────────────────────────────

/// Size of one harvested device log record.
pub const LOG_RECORD_LEN: usize = 16;

/// One device log record, as received on the wire.
pub type LogRecord = [u8; LOG_RECORD_LEN];

/// Bounded FIFO store of harvested log records.
pub trait RecordStore {
    /// Append a record, evicting the oldest when full.
    fn append(&mut self, record: &LogRecord) -> Result<(), StoreError>;

    /// Oldest stored record.
    fn read_oldest(&self) -> Result<LogRecord, StoreError>;

    /// Remove the oldest stored record.
    fn delete_oldest(&mut self) -> Result<(), StoreError>;

    fn count(&self) -> usize;
}

// ───────────────────────────────────────────────────────────────
// Clock ports
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock driving every timeout.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Calendar date and time, as broadcast to devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalendarTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    /// 1 = Monday … 7 = Sunday.
    pub weekday: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Time-of-day source.  `None` until the gateway has a valid time.
pub trait WallClock {
    fn now(&self) -> Option<CalendarTime>;
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The bus core emits structured [`BusEvent`](super::events::BusEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::BusEvent);
}
