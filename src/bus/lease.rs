//! Client Manager contract and the transmit lease.
//!
//! A [`Lease`] is the only way to put a frame on the wire.  The arbiter
//! creates one per dispatch offer and consumes it afterwards; a manager
//! that sends through it becomes the lease holder until its transaction
//! ends.  A lease carries at most one frame.

use log::trace;

use super::transport::FrameWriter;
use crate::error::BusError;
use crate::protocol::FrameView;
use crate::protocol::frame::{FrameBuf, FrameKind, encode_into};

/// What a manager did with a delivered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The frame was the awaited reply; the transaction is over.
    Consumed,
    /// Not the awaited reply (wrong source or opcode); keep waiting.
    Ignored,
}

/// How the frame sent under a lease expects to be answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// A reply addressed to us must arrive before the response timeout.
    Reply,
    /// Fire-and-forget; the lease ends as soon as the frame is out.
    Nothing,
}

/// Capability contract implemented by every bus client.
pub trait ClientManager {
    /// Short tag for logs.
    fn name(&self) -> &'static str;

    /// Send at most one frame through `lease` if there is work, or
    /// return without sending to decline.
    fn offer_work(&mut self, lease: &mut Lease<'_>, now_ms: u64);

    /// A valid frame addressed to us arrived while this manager held the
    /// lease.
    fn handle_response(&mut self, frame: &FrameView<'_>, now_ms: u64) -> Disposition;

    /// No acceptable reply arrived in time.
    fn handle_timeout(&mut self, now_ms: u64);
}

/// One-shot transmit permission handed to [`ClientManager::offer_work`].
pub struct Lease<'a> {
    writer: &'a mut dyn FrameWriter,
    source: u16,
    scratch: &'a mut FrameBuf,
    sent: Option<Expect>,
}

impl<'a> Lease<'a> {
    pub fn new(writer: &'a mut dyn FrameWriter, source: u16, scratch: &'a mut FrameBuf) -> Self {
        Self {
            writer,
            source,
            scratch,
            sent: None,
        }
    }

    /// Send a frame that expects a reply.
    pub fn request(&mut self, kind: FrameKind, target: u16, payload: &[u8]) -> Result<(), BusError> {
        self.send(kind, target, payload, Expect::Reply)
    }

    /// Send a frame that expects no reply; the lease ends immediately.
    pub fn notify(&mut self, kind: FrameKind, target: u16, payload: &[u8]) -> Result<(), BusError> {
        self.send(kind, target, payload, Expect::Nothing)
    }

    /// Source address stamped on outbound frames.
    pub fn source(&self) -> u16 {
        self.source
    }

    /// Whether this lease has already carried a frame.
    pub fn is_spent(&self) -> bool {
        self.sent.is_some()
    }

    pub fn outcome(&self) -> Option<Expect> {
        self.sent
    }

    fn send(&mut self, kind: FrameKind, target: u16, payload: &[u8], expect: Expect) -> Result<(), BusError> {
        if self.sent.is_some() {
            return Err(BusError::LeaseSpent);
        }
        encode_into(kind, target, self.source, payload, self.scratch).map_err(BusError::Encode)?;
        self.writer.write_frame(self.scratch)?;
        trace!(
            "bus: tx {:?} -> {:#06x} ({} bytes)",
            kind,
            target,
            self.scratch.len()
        );
        self.sent = Some(expect);
        Ok(())
    }
}
