//! Multi-packet transfer manager (firmware, images, parameter sets).
//!
//! Flow per (device, artifact) pair:
//!
//! ```text
//!  Starting ─▶ AwaitingStartAck ─▶ SendingData ⇄ AwaitingDataAck
//!                                        │
//!                                        ▼
//!                               Finishing ─▶ AwaitingFinishAck ─▶ Completed
//!
//!  any rejection / exhausted retries ─▶ Failed ─▶ PendingCleanup ─▶ Idle
//! ```
//!
//! A campaign walks an address range (outer) and an artifact-index range
//! (inner).  Completing a pair advances to the next; a failure abandons the
//! rest.  The open source stream is dropped on every terminal transition.
//!
//! Two device protocol variants share this state machine.  They differ in
//! chunk size and in how a device acknowledges:
//!
//! | Variant      | Chunk | Acknowledgement                                  |
//! |--------------|-------|--------------------------------------------------|
//! | `Bootloader` | 64 B  | reply `[op, status]`, status 0 = ACK             |
//! | `Generic`    | 128 B | ACK / NAK start marker, payload echoes the opcode |
//!
//! A NAK to a data frame may carry the sequence number the device wants
//! next (`[op, seq:u16be]` generic, `[op, status, seq:u16be]` bootloader);
//! the stream is rewound to `(seq - 1) * chunk` and sending resumes there.

use core::fmt::{self, Write};

use heapless::{String, Vec};
use log::{debug, info, warn};

use crate::app::events::{BusEvent, EventQueue};
use crate::app::ports::{SourceStream, StreamSource};
use crate::bus::{ClientManager, Disposition, Lease};
use crate::config::BusConfig;
use crate::error::StreamError;
use crate::protocol::frame::FrameKind;
use crate::protocol::{FrameView, Opcode};

/// Largest chunk of any protocol variant.
pub const MAX_CHUNK: usize = 128;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    AlreadyActive,
    InvalidRange,
    Stream(StreamError),
    ArtifactTooLarge,
    StartRejected,
    DataRejected,
    FinishRejected,
    InvalidRewind,
    UnexpectedReply,
    RetriesExhausted,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyActive => write!(f, "a campaign is already running"),
            Self::InvalidRange => write!(f, "address or artifact range is empty"),
            Self::Stream(e) => write!(f, "source stream: {e}"),
            Self::ArtifactTooLarge => write!(f, "artifact needs more than 65535 chunks"),
            Self::StartRejected => write!(f, "device rejected transfer start"),
            Self::DataRejected => write!(f, "device rejected data without a rewind point"),
            Self::FinishRejected => write!(f, "device rejected transfer finish"),
            Self::InvalidRewind => write!(f, "device requested an impossible sequence"),
            Self::UnexpectedReply => write!(f, "unexpected reply"),
            Self::RetriesExhausted => write!(f, "retry budget exhausted"),
        }
    }
}

// ── Request types ─────────────────────────────────────────────

/// Device-side transfer protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVariant {
    Bootloader,
    Generic,
}

impl ProtocolVariant {
    pub const fn chunk_size(self) -> usize {
        match self {
            Self::Bootloader => 64,
            Self::Generic => 128,
        }
    }
}

/// Class of artifact, sent in the start frame and used to name the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArtifactKind {
    Firmware = 0x01,
    Image = 0x02,
    Parameters = 0x03,
}

impl ArtifactKind {
    pub const fn code(self) -> u8 {
        self as u8
    }

    const fn stem(self) -> &'static str {
        match self {
            Self::Firmware => "firmware",
            Self::Image => "image",
            Self::Parameters => "params",
        }
    }
}

/// Logical stream name for one artifact, e.g. `image_03.bin`.
pub type StreamName = String<24>;

pub fn stream_name(artifact: ArtifactKind, index: u8) -> Result<StreamName, TransferError> {
    let mut name = StreamName::new();
    write!(name, "{}_{:02}.bin", artifact.stem(), index)
        .map_err(|_| TransferError::Stream(StreamError::NotFound))?;
    Ok(name)
}

/// One campaign: every address in `first_address..=last_address` receives
/// every artifact in `first_index..=last_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferRequest {
    pub variant: ProtocolVariant,
    pub artifact: ArtifactKind,
    pub first_address: u16,
    pub last_address: u16,
    pub first_index: u8,
    pub last_index: u8,
}

impl TransferRequest {
    /// A single artifact to a single device.
    pub fn single(variant: ProtocolVariant, artifact: ArtifactKind, address: u16, index: u8) -> Self {
        Self {
            variant,
            artifact,
            first_address: address,
            last_address: address,
            first_index: index,
            last_index: index,
        }
    }

    pub fn pair_count(&self) -> u32 {
        let addresses = u32::from(self.last_address.saturating_sub(self.first_address)) + 1;
        let indices = u32::from(self.last_index.saturating_sub(self.first_index)) + 1;
        addresses * indices
    }
}

// ── State machine ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Starting,
    AwaitingStartAck,
    SendingData,
    AwaitingDataAck,
    Finishing,
    AwaitingFinishAck,
    Completed,
    Failed,
    PendingCleanup,
}

/// Terminal result of the last campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed { pairs: u32 },
    Failed(TransferError),
    Cancelled,
}

/// Snapshot for status pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub state: TransferState,
    pub target: u16,
    pub index: u8,
    pub bytes_sent: u32,
    pub total: u32,
    pub pairs_done: u32,
    pub pairs_total: u32,
}

/// How a device answered the frame we are waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reply {
    Ack,
    Nak(Option<u16>),
    Other,
}

fn classify(variant: ProtocolVariant, frame: &FrameView<'_>, expected: Opcode) -> Reply {
    if frame.opcode() != Some(expected.code()) {
        return Reply::Other;
    }
    match variant {
        ProtocolVariant::Generic => match frame.kind() {
            FrameKind::Ack => Reply::Ack,
            FrameKind::Nak => Reply::Nak(frame.u16_at(1)),
            _ => Reply::Other,
        },
        ProtocolVariant::Bootloader => match (frame.kind(), frame.u8_at(1)) {
            (FrameKind::Data, _) | (_, None) => Reply::Other,
            (FrameKind::Nak, Some(_)) => Reply::Nak(frame.u16_at(2)),
            (_, Some(0)) => Reply::Ack,
            (_, Some(_)) => Reply::Nak(frame.u16_at(2)),
        },
    }
}

/// Sequence number a data reply carries, if the device echoed one.
fn echoed_seq(variant: ProtocolVariant, frame: &FrameView<'_>) -> Option<u16> {
    match variant {
        ProtocolVariant::Generic => frame.u16_at(1),
        ProtocolVariant::Bootloader => frame.u16_at(2),
    }
}

/// Consume one retry from `retries`, failing once `budget` is spent.
fn spend_retry(retries: &mut u8, budget: u8) -> Result<(), TransferError> {
    if *retries >= budget {
        return Err(TransferError::RetriesExhausted);
    }
    *retries += 1;
    Ok(())
}

struct Session<St> {
    request: TransferRequest,
    target: u16,
    index: u8,
    stream: Option<St>,
    total: u32,
    checksum: u32,
    bytes_sent: u32,
    seq: u16,
    retries: u8,
    chunk: Vec<u8, MAX_CHUNK>,
    chunk_loaded: bool,
}

impl<St> Session<St> {
    fn new(request: TransferRequest) -> Self {
        Self {
            request,
            target: request.first_address,
            index: request.first_index,
            stream: None,
            total: 0,
            checksum: 0,
            bytes_sent: 0,
            seq: 1,
            retries: 0,
            chunk: Vec::new(),
            chunk_loaded: false,
        }
    }

    /// Next (address, index) in campaign order, if any.
    fn next_pair(&self) -> Option<(u16, u8)> {
        if self.index < self.request.last_index {
            Some((self.target, self.index + 1))
        } else if self.target < self.request.last_address {
            Some((self.target + 1, self.request.first_index))
        } else {
            None
        }
    }

    fn reset_pair(&mut self, target: u16, index: u8) {
        self.target = target;
        self.index = index;
        self.stream = None;
        self.total = 0;
        self.checksum = 0;
        self.bytes_sent = 0;
        self.seq = 1;
        self.retries = 0;
        self.chunk.clear();
        self.chunk_loaded = false;
    }
}

pub struct TransferManager<S: StreamSource> {
    name: &'static str,
    source: S,
    retry_budget: u8,
    state: TransferState,
    session: Option<Session<S::Stream>>,
    pairs_done: u32,
    last_outcome: Option<TransferOutcome>,
    events: EventQueue,
}

impl<S: StreamSource> TransferManager<S> {
    pub fn new(name: &'static str, source: S, config: &BusConfig) -> Self {
        Self {
            name,
            source,
            retry_budget: config.transfer_retries,
            state: TransferState::Idle,
            session: None,
            pairs_done: 0,
            last_outcome: None,
            events: EventQueue::new(),
        }
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// A campaign is in progress and may still transmit.
    pub fn is_active(&self) -> bool {
        !matches!(
            self.state,
            TransferState::Idle | TransferState::Failed | TransferState::PendingCleanup
        )
    }

    pub fn last_outcome(&self) -> Option<TransferOutcome> {
        self.last_outcome
    }

    pub fn events(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn progress(&self) -> TransferProgress {
        let (target, index, bytes_sent, total, pairs_total) = match &self.session {
            Some(s) => (s.target, s.index, s.bytes_sent, s.total, s.request.pair_count()),
            None => (0, 0, 0, 0, 0),
        };
        TransferProgress {
            state: self.state,
            target,
            index,
            bytes_sent,
            total,
            pairs_done: self.pairs_done,
            pairs_total,
        }
    }

    /// Begin a campaign.  Rejected while another one is active.
    pub fn start(&mut self, request: TransferRequest) -> Result<(), TransferError> {
        if self.is_active() {
            return Err(TransferError::AlreadyActive);
        }
        if request.first_address > request.last_address || request.first_index > request.last_index {
            return Err(TransferError::InvalidRange);
        }
        if self.state != TransferState::Idle {
            self.cleanup();
        }
        info!(
            "{}: campaign {:?} {:#06x}..={:#06x} idx {}..={} ({} pairs)",
            self.name,
            request.artifact,
            request.first_address,
            request.last_address,
            request.first_index,
            request.last_index,
            request.pair_count()
        );
        self.session = Some(Session::new(request));
        self.pairs_done = 0;
        self.last_outcome = None;
        self.state = TransferState::Starting;
        Ok(())
    }

    /// Cancel the campaign.  Returns whether anything was running.
    ///
    /// The caller must also revoke this manager's lease if it holds one.
    pub fn stop(&mut self) -> bool {
        if self.state == TransferState::Idle {
            return false;
        }
        info!("{}: cancelled in {:?}", self.name, self.state);
        if self.is_active() {
            self.last_outcome = Some(TransferOutcome::Cancelled);
        }
        self.cleanup();
        true
    }

    // ── Terminal transitions ──────────────────────────────────

    fn fail(&mut self, error: TransferError) {
        if let Some(s) = self.session.as_mut() {
            warn!(
                "{}: {:#06x} idx {} failed at {}/{}: {}",
                self.name, s.target, s.index, s.bytes_sent, s.total, error
            );
            s.stream = None;
            self.events.push(BusEvent::TransferFailed {
                manager: self.name,
                target: s.target,
                index: s.index,
                error,
            });
        }
        self.last_outcome = Some(TransferOutcome::Failed(error));
        self.state = TransferState::Failed;
    }

    fn complete_pair(&mut self) {
        if let Some(s) = self.session.as_mut() {
            info!("{}: {:#06x} idx {} complete ({} bytes)", self.name, s.target, s.index, s.total);
            s.stream = None;
            self.events.push(BusEvent::TransferCompleted {
                manager: self.name,
                target: s.target,
                artifact: s.request.artifact,
                index: s.index,
            });
        }
        self.pairs_done += 1;
        self.state = TransferState::Completed;
    }

    /// Move to the next pair, or close the campaign when none is left.
    fn advance(&mut self) {
        let next = self.session.as_ref().and_then(Session::next_pair);
        match (next, self.session.as_mut()) {
            (Some((target, index)), Some(s)) => {
                s.reset_pair(target, index);
                self.state = TransferState::Starting;
            }
            _ => {
                self.last_outcome = Some(TransferOutcome::Completed {
                    pairs: self.pairs_done,
                });
                self.cleanup();
            }
        }
    }

    /// Release the stream and session, then return to Idle.
    fn cleanup(&mut self) {
        self.state = TransferState::PendingCleanup;
        self.session = None;
        if let Some(outcome) = self.last_outcome {
            self.events.push(BusEvent::CampaignFinished {
                manager: self.name,
                outcome,
            });
        }
        debug!("{}: idle", self.name);
        self.state = TransferState::Idle;
    }

    // ── Senders ───────────────────────────────────────────────

    fn send_start(&mut self, lease: &mut Lease<'_>) -> Result<(), TransferError> {
        let budget = self.retry_budget;
        let Some(s) = self.session.as_mut() else {
            return Ok(());
        };
        if s.stream.is_none() {
            let name = stream_name(s.request.artifact, s.index)?;
            let stream = self.source.open(&name).map_err(TransferError::Stream)?;
            let total = stream.len();
            if total == 0 {
                return Err(TransferError::Stream(StreamError::InvalidLength));
            }
            let chunk = s.request.variant.chunk_size() as u32;
            if total.div_ceil(chunk) > u32::from(u16::MAX) {
                return Err(TransferError::ArtifactTooLarge);
            }
            s.total = total;
            s.checksum = stream.checksum();
            s.stream = Some(stream);
            info!(
                "{}: {} -> {:#06x} ({} bytes, sum {:#010x})",
                self.name, name, s.target, s.total, s.checksum
            );
            self.events.push(BusEvent::TransferStarted {
                manager: self.name,
                target: s.target,
                artifact: s.request.artifact,
                index: s.index,
                size: s.total,
            });
        }

        let mut payload = [0u8; 11];
        payload[0] = Opcode::TransferStart.code();
        payload[1] = s.request.artifact.code();
        payload[2] = s.index;
        payload[3..7].copy_from_slice(&s.total.to_be_bytes());
        payload[7..11].copy_from_slice(&s.checksum.to_be_bytes());
        match lease.request(FrameKind::Command, s.target, &payload) {
            Ok(()) => self.state = TransferState::AwaitingStartAck,
            Err(e) => {
                warn!("{}: start send failed: {}", self.name, e);
                spend_retry(&mut s.retries, budget)?;
            }
        }
        Ok(())
    }

    fn send_data(&mut self, lease: &mut Lease<'_>) -> Result<(), TransferError> {
        let budget = self.retry_budget;
        let Some(s) = self.session.as_mut() else {
            return Ok(());
        };
        if !s.chunk_loaded {
            let stream = s
                .stream
                .as_mut()
                .ok_or(TransferError::Stream(StreamError::ReadFailed))?;
            let remaining = (s.total - s.bytes_sent) as usize;
            let want = remaining.min(s.request.variant.chunk_size());
            s.chunk.clear();
            s.chunk
                .resize_default(want)
                .map_err(|()| TransferError::Stream(StreamError::ReadFailed))?;
            let mut filled = 0;
            while filled < want {
                let n = stream
                    .read_chunk(&mut s.chunk[filled..want])
                    .map_err(TransferError::Stream)?;
                if n == 0 {
                    return Err(TransferError::Stream(StreamError::ReadFailed));
                }
                filled += n;
            }
            s.chunk_loaded = true;
        }

        let mut payload: Vec<u8, { MAX_CHUNK + 3 }> = Vec::new();
        payload.push(Opcode::TransferData.code()).ok();
        payload.extend_from_slice(&s.seq.to_be_bytes()).ok();
        payload.extend_from_slice(&s.chunk).ok();
        match lease.request(FrameKind::Data, s.target, &payload) {
            Ok(()) => {
                debug!("{}: seq {} ({} bytes) -> {:#06x}", self.name, s.seq, s.chunk.len(), s.target);
                self.state = TransferState::AwaitingDataAck;
            }
            Err(e) => {
                warn!("{}: data send failed: {}", self.name, e);
                spend_retry(&mut s.retries, budget)?;
            }
        }
        Ok(())
    }

    fn send_finish(&mut self, lease: &mut Lease<'_>) -> Result<(), TransferError> {
        let budget = self.retry_budget;
        let Some(s) = self.session.as_mut() else {
            return Ok(());
        };
        let payload = [Opcode::TransferFinish.code(), s.request.artifact.code(), s.index];
        match lease.request(FrameKind::Command, s.target, &payload) {
            Ok(()) => self.state = TransferState::AwaitingFinishAck,
            Err(e) => {
                warn!("{}: finish send failed: {}", self.name, e);
                spend_retry(&mut s.retries, budget)?;
            }
        }
        Ok(())
    }

    // ── Reply handlers ────────────────────────────────────────

    fn on_data_reply(&mut self, reply: Reply) -> Result<(), TransferError> {
        let budget = self.retry_budget;
        let Some(s) = self.session.as_mut() else {
            return Ok(());
        };
        match reply {
            Reply::Ack => {
                s.bytes_sent = s.bytes_sent.saturating_add(s.chunk.len() as u32);
                s.retries = 0;
                s.chunk_loaded = false;
                if s.bytes_sent >= s.total {
                    self.state = TransferState::Finishing;
                } else {
                    s.seq += 1;
                    self.state = TransferState::SendingData;
                }
                Ok(())
            }
            Reply::Nak(Some(requested)) => {
                if requested == 0 || requested > s.seq {
                    return Err(TransferError::InvalidRewind);
                }
                spend_retry(&mut s.retries, budget)?;
                let offset = u32::from(requested - 1) * s.request.variant.chunk_size() as u32;
                let stream = s
                    .stream
                    .as_mut()
                    .ok_or(TransferError::Stream(StreamError::SeekFailed))?;
                stream.seek(offset).map_err(TransferError::Stream)?;
                warn!(
                    "{}: {:#06x} NAK at seq {}, rewinding to seq {} (offset {})",
                    self.name, s.target, s.seq, requested, offset
                );
                s.seq = requested;
                s.bytes_sent = offset;
                s.chunk_loaded = false;
                self.state = TransferState::SendingData;
                Ok(())
            }
            Reply::Nak(None) => Err(TransferError::DataRejected),
            Reply::Other => Err(TransferError::UnexpectedReply),
        }
    }
}

impl<S: StreamSource> ClientManager for TransferManager<S> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn offer_work(&mut self, lease: &mut Lease<'_>, _now_ms: u64) {
        match self.state {
            TransferState::Completed => self.advance(),
            TransferState::Failed => self.cleanup(),
            _ => {}
        }
        let result = match self.state {
            TransferState::Starting => self.send_start(lease),
            TransferState::SendingData => self.send_data(lease),
            TransferState::Finishing => self.send_finish(lease),
            _ => return,
        };
        if let Err(e) = result {
            self.fail(e);
        }
    }

    fn handle_response(&mut self, frame: &FrameView<'_>, _now_ms: u64) -> Disposition {
        let Some(s) = self.session.as_ref() else {
            return Disposition::Ignored;
        };
        if frame.source() != s.target {
            return Disposition::Ignored;
        }
        let variant = s.request.variant;
        let seq = s.seq;
        let result = match self.state {
            TransferState::AwaitingStartAck => match classify(variant, frame, Opcode::TransferStart) {
                Reply::Ack => {
                    if let Some(s) = self.session.as_mut() {
                        s.seq = 1;
                        s.bytes_sent = 0;
                        s.retries = 0;
                        s.chunk_loaded = false;
                    }
                    self.state = TransferState::SendingData;
                    Ok(())
                }
                Reply::Nak(_) => Err(TransferError::StartRejected),
                Reply::Other => Err(TransferError::UnexpectedReply),
            },
            TransferState::AwaitingDataAck => {
                let reply = classify(variant, frame, Opcode::TransferData);
                if let Some(echo) = echoed_seq(variant, frame).filter(|&e| reply == Reply::Ack && e != seq) {
                    debug!("{}: stale ack for seq {} while on {}", self.name, echo, seq);
                    return Disposition::Ignored;
                }
                self.on_data_reply(reply)
            }
            TransferState::AwaitingFinishAck => match classify(variant, frame, Opcode::TransferFinish) {
                Reply::Ack => {
                    self.complete_pair();
                    Ok(())
                }
                Reply::Nak(_) => Err(TransferError::FinishRejected),
                Reply::Other => Err(TransferError::UnexpectedReply),
            },
            _ => return Disposition::Ignored,
        };
        if let Err(e) = result {
            self.fail(e);
        }
        Disposition::Consumed
    }

    fn handle_timeout(&mut self, _now_ms: u64) {
        let resend = match self.state {
            TransferState::AwaitingStartAck => TransferState::Starting,
            TransferState::AwaitingDataAck => TransferState::SendingData,
            TransferState::AwaitingFinishAck => TransferState::Finishing,
            _ => return,
        };
        let budget = self.retry_budget;
        let Some(s) = self.session.as_mut() else {
            return;
        };
        match spend_retry(&mut s.retries, budget) {
            Ok(()) => {
                warn!(
                    "{}: {:#06x} timeout in {:?}, retry {}/{}",
                    self.name, s.target, self.state, s.retries, budget
                );
                self.state = resend;
            }
            Err(e) => self.fail(e),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────
