//! Frame codec: build, assemble and validate wire frames.
//!
//! Inbound bytes are accumulated by [`FrameAssembler`], which yields a raw
//! frame once the length announced in the header has arrived.  The raw frame
//! is then checked by [`validate`], which hands back a bounds-checked
//! [`FrameView`].  Nothing in a payload is trusted before that point.

use heapless::{Deque, Vec};

use crate::error::FrameError;

/// Start marker of a command frame.
pub const START_CMD: u8 = 0x01;
/// Start marker of a data frame.
pub const START_DATA: u8 = 0x02;
/// Start marker of a positive acknowledgement.
pub const START_ACK: u8 = 0x06;
/// Start marker of a negative acknowledgement.
pub const START_NAK: u8 = 0x15;
/// Trailing byte of every frame.
pub const END_MARKER: u8 = 0x04;

/// Start marker, two addresses and the length byte.
pub const HEADER_LEN: usize = 6;
/// Header plus checksum plus end marker.
pub const FRAME_OVERHEAD: usize = 9;
/// Smallest valid frame: a one-byte payload.
pub const MIN_FRAME_LEN: usize = FRAME_OVERHEAD + 1;
/// Largest payload the length byte can describe.
pub const MAX_PAYLOAD: usize = 255;
/// Largest frame on the wire.
pub const MAX_FRAME_LEN: usize = MAX_PAYLOAD + FRAME_OVERHEAD;

/// Owned payload buffer.
pub type Payload = Vec<u8, MAX_PAYLOAD>;
/// Owned encoded frame.
pub type FrameBuf = Vec<u8, MAX_FRAME_LEN>;

/// 16-bit wrapping sum of `bytes`.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

// ---------------------------------------------------------------------------
// Frame kind (start marker)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    Command = START_CMD,
    Data = START_DATA,
    Ack = START_ACK,
    Nak = START_NAK,
}

impl FrameKind {
    pub const fn marker(self) -> u8 {
        self as u8
    }

    pub fn from_marker(raw: u8) -> Option<Self> {
        match raw {
            START_CMD => Some(Self::Command),
            START_DATA => Some(Self::Data),
            START_ACK => Some(Self::Ack),
            START_NAK => Some(Self::Nak),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Owned frame
// ---------------------------------------------------------------------------

/// Decoded frame fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    pub target: u16,
    pub source: u16,
    pub payload: Payload,
}

impl Frame {
    pub fn new(kind: FrameKind, target: u16, source: u16, payload: &[u8]) -> Result<Self, FrameError> {
        let payload = Payload::from_slice(payload).map_err(|()| FrameError::PayloadTooLarge)?;
        Ok(Self {
            kind,
            target,
            source,
            payload,
        })
    }

    pub fn opcode(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Serialise to wire bytes.
    pub fn encode(&self) -> FrameBuf {
        let mut out = FrameBuf::new();
        // The payload type bounds N to 255, so the fixed buffer always fits.
        let _ = encode_into(self.kind, self.target, self.source, &self.payload, &mut out);
        out
    }
}

/// Encode a frame into `out`, replacing its contents.
pub fn encode_into(
    kind: FrameKind,
    target: u16,
    source: u16,
    payload: &[u8],
    out: &mut FrameBuf,
) -> Result<(), FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge);
    }
    out.clear();
    let mut header = [0u8; HEADER_LEN];
    header[0] = kind.marker();
    header[1..3].copy_from_slice(&target.to_be_bytes());
    header[3..5].copy_from_slice(&source.to_be_bytes());
    header[5] = payload.len() as u8;

    let sum = checksum(payload).to_be_bytes();
    let fits = out.extend_from_slice(&header).is_ok()
        && out.extend_from_slice(payload).is_ok()
        && out.extend_from_slice(&sum).is_ok()
        && out.push(END_MARKER).is_ok();
    if fits {
        Ok(())
    } else {
        Err(FrameError::PayloadTooLarge)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Structural checks shared by [`parse`] and [`validate`].
fn check_structure(buf: &[u8]) -> Result<FrameKind, FrameError> {
    if buf.len() < MIN_FRAME_LEN {
        return Err(FrameError::TooShort);
    }
    if buf.len() != usize::from(buf[5]) + FRAME_OVERHEAD {
        return Err(FrameError::LengthMismatch);
    }
    let kind = FrameKind::from_marker(buf[0]).ok_or(FrameError::BadStartMarker)?;
    if buf[buf.len() - 1] != END_MARKER {
        return Err(FrameError::BadEndMarker);
    }
    Ok(kind)
}

fn check_sum(buf: &[u8]) -> Result<(), FrameError> {
    let n = usize::from(buf[5]);
    let payload = &buf[HEADER_LEN..HEADER_LEN + n];
    let sent = u16::from_be_bytes([buf[HEADER_LEN + n], buf[HEADER_LEN + n + 1]]);
    if checksum(payload) == sent {
        Ok(())
    } else {
        Err(FrameError::ChecksumMismatch)
    }
}

/// Parse a complete frame regardless of its target address.
pub fn parse(buf: &[u8]) -> Result<FrameView<'_>, FrameError> {
    let kind = check_structure(buf)?;
    check_sum(buf)?;
    Ok(FrameView { raw: buf, kind })
}

/// Full inbound validation against our own interface address.
///
/// Checks run in a fixed order: minimum length, length byte, start marker,
/// end marker, target address, checksum.
pub fn validate(buf: &[u8], own_address: u16) -> Result<FrameView<'_>, FrameError> {
    let kind = check_structure(buf)?;
    if u16::from_be_bytes([buf[1], buf[2]]) != own_address {
        return Err(FrameError::ForeignTarget);
    }
    check_sum(buf)?;
    Ok(FrameView { raw: buf, kind })
}

// ---------------------------------------------------------------------------
// Structured view
// ---------------------------------------------------------------------------

/// Borrowed view of a validated frame.
///
/// Payload accessors take payload-relative offsets and return `None` when
/// the field would run past the payload.
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    raw: &'a [u8],
    kind: FrameKind,
}

impl<'a> FrameView<'a> {
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn target(&self) -> u16 {
        u16::from_be_bytes([self.raw[1], self.raw[2]])
    }

    pub fn source(&self) -> u16 {
        u16::from_be_bytes([self.raw[3], self.raw[4]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.raw[HEADER_LEN..HEADER_LEN + usize::from(self.raw[5])]
    }

    pub fn opcode(&self) -> Option<u8> {
        self.payload().first().copied()
    }

    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn u8_at(&self, offset: usize) -> Option<u8> {
        self.payload().get(offset).copied()
    }

    pub fn u16_at(&self, offset: usize) -> Option<u16> {
        let b = self.bytes_at(offset, 2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        let b = self.bytes_at(offset, 4)?;
        Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn bytes_at(&self, offset: usize, len: usize) -> Option<&'a [u8]> {
        self.payload().get(offset..offset.checked_add(len)?)
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            kind: self.kind,
            target: self.target(),
            source: self.source(),
            // A validated payload is at most 255 bytes.
            payload: Payload::from_slice(self.payload()).unwrap_or_default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Streaming assembler
// ---------------------------------------------------------------------------

/// Accumulates inbound bytes into one raw frame.
///
/// Bytes seen before a start marker are dropped as line noise.  Once the
/// header is in, the frame end is taken from the length byte, so an
/// end-marker value inside the payload does not cut the frame short.
///
/// A noise byte that happens to equal a start marker opens a false frame
/// whose length byte is really part of the next frame.  [`rewind`] drops the
/// first buffered byte and replays the rest, so a real frame hidden behind
/// the false start is still recovered.  The assembler rewinds on its own when
/// a candidate does not close with the end marker; callers rewind after any
/// other framing rejection and when the line goes quiet mid-frame.
///
/// [`rewind`]: FrameAssembler::rewind
pub struct FrameAssembler {
    buf: FrameBuf,
    expected: usize,
    complete: bool,
    replay: Deque<u8, REPLAY_LEN>,
    false_starts: u32,
}

/// Room for one rewound frame plus the bytes queued behind it.
const REPLAY_LEN: usize = 2 * MAX_FRAME_LEN;

impl FrameAssembler {
    pub fn new() -> Self {
        Self {
            buf: FrameBuf::new(),
            expected: 0,
            complete: false,
            replay: Deque::new(),
            false_starts: 0,
        }
    }

    /// Push one byte.  Returns a raw frame if one completes.
    /// The slice stays valid until the next call that mutates the assembler.
    ///
    /// After a rewind more than one frame may be waiting; drain the rest
    /// with [`next_frame`](Self::next_frame).
    pub fn push(&mut self, byte: u8) -> Option<&[u8]> {
        self.feed(byte);
        self.next_frame()
    }

    /// Queue one byte without assembling.
    pub fn feed(&mut self, byte: u8) {
        if self.replay.is_full() {
            self.replay.pop_front();
        }
        let _ = self.replay.push_back(byte);
    }

    /// Assemble queued bytes until a frame completes or the queue runs dry.
    pub fn next_frame(&mut self) -> Option<&[u8]> {
        if self.complete {
            self.clear_frame();
        }
        while let Some(byte) = self.replay.pop_front() {
            if self.accept(byte) {
                self.complete = true;
                return Some(self.buf.as_slice());
            }
        }
        None
    }

    /// Abandon the current candidate and replay it from its second byte.
    pub fn rewind(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        self.false_starts = self.false_starts.wrapping_add(1);
        for &byte in self.buf.iter().skip(1).rev() {
            if self.replay.push_front(byte).is_err() {
                break;
            }
        }
        self.clear_frame();
    }

    /// True while a frame has started but not finished.
    pub fn is_partial(&self) -> bool {
        !self.complete && !self.buf.is_empty()
    }

    /// True while bytes are queued for assembly.
    pub fn has_pending(&self) -> bool {
        !self.replay.is_empty()
    }

    /// Candidates abandoned by [`rewind`](Self::rewind) since construction.
    pub fn false_starts(&self) -> u32 {
        self.false_starts
    }

    /// Discard any partial frame and every queued byte.
    pub fn reset(&mut self) {
        self.clear_frame();
        self.replay.clear();
    }

    fn clear_frame(&mut self) {
        self.buf.clear();
        self.expected = 0;
        self.complete = false;
    }

    /// Add one byte to the candidate.  True when it closes a frame.
    fn accept(&mut self, byte: u8) -> bool {
        if self.buf.is_empty() && FrameKind::from_marker(byte).is_none() {
            return false;
        }
        if self.buf.push(byte).is_err() {
            self.rewind();
            return false;
        }
        if self.buf.len() == HEADER_LEN {
            self.expected = usize::from(byte) + FRAME_OVERHEAD;
        }
        if self.expected == 0 || self.buf.len() < self.expected {
            return false;
        }
        if byte == END_MARKER {
            return true;
        }
        self.rewind();
        false
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────
