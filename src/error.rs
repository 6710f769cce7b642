//! Unified error types for the bus master.
//!
//! A single `Error` enum that every subsystem can convert into.  All
//! variants are `Copy` so they can be recorded in session state and passed
//! through the arbiter callbacks without allocation.

use core::fmt;

use crate::clients::query::QueryError;
use crate::clients::transfer::TransferError;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A received byte sequence is not a valid frame for us.
    Frame(FrameError),
    /// The physical channel or lease refused an operation.
    Bus(BusError),
    /// A transfer session terminated unsuccessfully.
    Transfer(TransferError),
    /// A source stream could not be opened, read or repositioned.
    Stream(StreamError),
    /// The record store rejected an operation.
    Store(StoreError),
    /// A synchronous query did not complete.
    Query(QueryError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "frame: {e}"),
            Self::Bus(e) => write!(f, "bus: {e}"),
            Self::Transfer(e) => write!(f, "transfer: {e}"),
            Self::Stream(e) => write!(f, "stream: {e}"),
            Self::Store(e) => write!(f, "store: {e}"),
            Self::Query(e) => write!(f, "query: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame errors
// ---------------------------------------------------------------------------

/// Reasons a byte sequence fails frame validation, in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer than the 10 bytes of the smallest possible frame.
    TooShort,
    /// Buffer length disagrees with the length byte (`N + 9`).
    LengthMismatch,
    /// First byte is not CMD, DATA, ACK or NAK.
    BadStartMarker,
    /// Last byte is not the end marker.
    BadEndMarker,
    /// Well-formed, but addressed to another interface.
    ForeignTarget,
    /// Transmitted checksum does not match the payload sum.
    ChecksumMismatch,
    /// Payload would not fit the one-byte length field.
    PayloadTooLarge,
}

impl FrameError {
    /// Foreign-target frames are normal shared-bus traffic, not faults.
    pub const fn is_fault(self) -> bool {
        !matches!(self, Self::ForeignTarget)
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame shorter than 10 bytes"),
            Self::LengthMismatch => write!(f, "length byte does not match frame size"),
            Self::BadStartMarker => write!(f, "unknown start marker"),
            Self::BadEndMarker => write!(f, "missing end marker"),
            Self::ForeignTarget => write!(f, "addressed to another interface"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::PayloadTooLarge => write!(f, "payload exceeds 255 bytes"),
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

// ---------------------------------------------------------------------------
// Bus errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusError {
    /// The transport failed while writing a frame.
    WriteFailed,
    /// The transport accepted fewer bytes than the frame length.
    ShortWrite,
    /// The lease was already used for a transmission this cycle.
    LeaseSpent,
    /// Frame construction failed.
    Encode(FrameError),
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WriteFailed => write!(f, "transport write failed"),
            Self::ShortWrite => write!(f, "transport accepted a partial frame"),
            Self::LeaseSpent => write!(f, "lease already used for this transaction"),
            Self::Encode(e) => write!(f, "cannot encode frame: {e}"),
        }
    }
}

impl From<BusError> for Error {
    fn from(e: BusError) -> Self {
        Self::Bus(e)
    }
}

// ---------------------------------------------------------------------------
// Stream errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// No artifact is published under the requested name.
    NotFound,
    /// The artifact exists but could not be opened.
    OpenFailed,
    /// A sequential read failed.
    ReadFailed,
    /// Repositioning to an offset failed or the offset is out of range.
    SeekFailed,
    /// Artifact is empty or larger than the 32-bit size field.
    InvalidLength,
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "artifact not found"),
            Self::OpenFailed => write!(f, "artifact could not be opened"),
            Self::ReadFailed => write!(f, "artifact read failed"),
            Self::SeekFailed => write!(f, "artifact seek failed"),
            Self::InvalidLength => write!(f, "artifact length out of range"),
        }
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        Self::Stream(e)
    }
}

// ---------------------------------------------------------------------------
// Record store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    /// The backend refused the write.
    Rejected,
    /// The store holds no records.
    Empty,
    /// Generic I/O failure in the backend.
    IoError,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "record rejected"),
            Self::Empty => write!(f, "store empty"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<TransferError> for Error {
    fn from(e: TransferError) -> Self {
        Self::Transfer(e)
    }
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        Self::Query(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, Error>;
