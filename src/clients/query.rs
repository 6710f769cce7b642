//! Synchronous query bridge.
//!
//! Turns one call from another execution context into exactly one bus
//! transaction.
//!
//! ```text
//!  caller thread                        bus thread
//!  ─────────────                        ──────────
//!  QueryClient::query()
//!    lock gate ─────┐
//!    try_send ──────┼──▶ requests ──▶ QueryBridge::offer_work ──▶ wire
//!    wait(signal    │                 handle_response / timeout
//!      or timer) ◀──┼──── Signal ◀────────────┘
//!    unlock ────────┘
//! ```
//!
//! The gate admits one caller at a time.  The caller's timer is
//! independent of, and longer than, the bus response timeout, so a wedged
//! bus cannot block a caller forever.

use core::fmt;
use core::time::Duration;
use std::sync::Arc;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use log::{debug, warn};

use crate::app::events::{BusEvent, EventQueue};
use crate::bus::{ClientManager, Disposition, Lease};
use crate::config::BusConfig;
use crate::protocol::frame::{FrameKind, MAX_PAYLOAD};
use crate::protocol::{FrameView, Opcode, Payload};

/// Envelope bytes in front of a forwarded payload.
pub const FORWARD_HEADER_LEN: usize = 4;

// ── Error type ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryError {
    /// A previous request is still queued for the bus.
    Busy,
    /// The caller's own deadline passed.
    Timeout,
    /// The bus transaction ended without a reply.
    NoReply,
    /// The device answered with a NAK.
    Nak,
    /// The frame could not be put on the wire.
    SendFailed,
    /// The command does not fit a frame or cannot be nested.
    InvalidCommand,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy => write!(f, "query slot busy"),
            Self::Timeout => write!(f, "caller deadline passed"),
            Self::NoReply => write!(f, "device did not reply"),
            Self::Nak => write!(f, "device rejected the command"),
            Self::SendFailed => write!(f, "frame could not be sent"),
            Self::InvalidCommand => write!(f, "command cannot be encoded"),
        }
    }
}

// ── Commands ──────────────────────────────────────────────────

/// Typed device commands available to synchronous callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryCommand {
    Status,
    SetDigitalOutputs { mask: u8 },
    SetRoomTemperature { setpoint_tenths: i16, differential_tenths: u8 },
    SetDisplayBrightness { level: u8 },
    SetSystemId { system_id: u16 },
    ReconfigureBus { new_address: u16, baud_code: u8 },
    /// Inner payload relayed by a bus coupler to a secondary segment.
    Forward { secondary_target: u8, inner: Payload },
}

impl QueryCommand {
    /// Wrap `inner` for a device on the secondary segment.
    pub fn forwarded(secondary_target: u8, inner: &QueryCommand) -> Result<Self, QueryError> {
        if matches!(inner, Self::Forward { .. }) {
            return Err(QueryError::InvalidCommand);
        }
        Ok(Self::Forward {
            secondary_target,
            inner: inner.payload(0)?,
        })
    }

    /// Frame payload; `secondary_source` is our address on the secondary
    /// segment, used only by `Forward`.
    pub fn payload(&self, secondary_source: u8) -> Result<Payload, QueryError> {
        let mut out = Payload::new();
        let fits = match self {
            Self::Status => out.push(Opcode::StatusQuery.code()).is_ok(),
            Self::SetDigitalOutputs { mask } => {
                out.extend_from_slice(&[Opcode::DigitalOutputSet.code(), *mask]).is_ok()
            }
            Self::SetRoomTemperature {
                setpoint_tenths,
                differential_tenths,
            } => {
                let sp = setpoint_tenths.to_be_bytes();
                out.extend_from_slice(&[
                    Opcode::RoomTemperatureSet.code(),
                    sp[0],
                    sp[1],
                    *differential_tenths,
                ])
                .is_ok()
            }
            Self::SetDisplayBrightness { level } => out
                .extend_from_slice(&[Opcode::DisplayBrightnessSet.code(), *level])
                .is_ok(),
            Self::SetSystemId { system_id } => {
                let id = system_id.to_be_bytes();
                out.extend_from_slice(&[Opcode::SystemIdSet.code(), id[0], id[1]]).is_ok()
            }
            Self::ReconfigureBus {
                new_address,
                baud_code,
            } => {
                let a = new_address.to_be_bytes();
                out.extend_from_slice(&[Opcode::BusReconfigure.code(), a[0], a[1], *baud_code])
                    .is_ok()
            }
            Self::Forward {
                secondary_target,
                inner,
            } => {
                inner.len() + FORWARD_HEADER_LEN <= MAX_PAYLOAD
                    && out
                        .extend_from_slice(&[
                            Opcode::BridgeWrap.code(),
                            *secondary_target,
                            secondary_source,
                            inner.len() as u8,
                        ])
                        .is_ok()
                    && out.extend_from_slice(inner).is_ok()
            }
        };
        if fits {
            Ok(out)
        } else {
            Err(QueryError::InvalidCommand)
        }
    }
}

// ── Shared state ──────────────────────────────────────────────

type ReplySignal = Signal<CriticalSectionRawMutex, Result<Payload, QueryError>>;

struct PendingQuery {
    target: u16,
    payload: Payload,
    reply: Arc<ReplySignal>,
}

struct QueryShared {
    requests: Channel<CriticalSectionRawMutex, PendingQuery, 1>,
    gate: Mutex<CriticalSectionRawMutex, ()>,
}

/// Create the bus-side bridge and its cloneable caller handle.
pub fn query_bridge(config: &BusConfig) -> (QueryBridge, QueryClient) {
    let shared = Arc::new(QueryShared {
        requests: Channel::new(),
        gate: Mutex::new(()),
    });
    let bridge = QueryBridge {
        shared: shared.clone(),
        broadcast_address: config.broadcast_address,
        in_flight: None,
        completed: 0,
        events: EventQueue::new(),
    };
    let client = QueryClient {
        shared,
        secondary_source: config.secondary_interface_address,
        timeout: Duration::from_millis(u64::from(config.query_timeout_ms)),
    };
    (bridge, client)
}

// ── Caller side ───────────────────────────────────────────────

#[derive(Clone)]
pub struct QueryClient {
    shared: Arc<QueryShared>,
    secondary_source: u8,
    timeout: Duration,
}

impl QueryClient {
    /// Issue `command` to `target` and wait for the reply payload.
    pub async fn query(&self, target: u16, command: &QueryCommand) -> Result<Payload, QueryError> {
        let payload = command.payload(self.secondary_source)?;
        let _gate = self.shared.gate.lock().await;
        let reply = self.submit(target, payload)?;

        let result = futures_lite::future::or(reply.wait(), async {
            async_io_mini::Timer::after(self.timeout).await;
            Err(QueryError::Timeout)
        })
        .await;

        if result == Err(QueryError::Timeout) {
            // Withdraw the request if the bus never picked it up.
            if self.shared.requests.try_receive().is_ok() {
                debug!("QUERY: {:#06x} withdrawn before dispatch", target);
            }
            warn!("QUERY: {:#06x} caller deadline passed", target);
        }
        result
    }

    /// Blocking form: copies the reply payload into `reply` (truncating)
    /// and returns whether the query succeeded.
    pub fn query_blocking(&self, target: u16, command: &QueryCommand, reply: &mut [u8]) -> bool {
        match futures_lite::future::block_on(self.query(target, command)) {
            Ok(payload) => {
                let n = payload.len().min(reply.len());
                reply[..n].copy_from_slice(&payload[..n]);
                true
            }
            Err(_) => false,
        }
    }

    fn submit(&self, target: u16, payload: Payload) -> Result<Arc<ReplySignal>, QueryError> {
        let reply = Arc::new(ReplySignal::new());
        let pending = PendingQuery {
            target,
            payload,
            reply: reply.clone(),
        };
        self.shared
            .requests
            .try_send(pending)
            .map_err(|_| QueryError::Busy)?;
        Ok(reply)
    }
}

// ── Bus side ──────────────────────────────────────────────────

struct InFlight {
    target: u16,
    reply: Arc<ReplySignal>,
}

pub struct QueryBridge {
    shared: Arc<QueryShared>,
    broadcast_address: u16,
    in_flight: Option<InFlight>,
    completed: u32,
    events: EventQueue,
}

impl QueryBridge {
    pub fn is_active(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Queries that reached a terminal state since construction.
    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn events(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    fn complete(&mut self, target: u16, reply: &ReplySignal, result: Result<Payload, QueryError>) {
        debug!("QUERY: {:#06x} -> {:?}", target, result.as_ref().map(|p| p.len()));
        self.events.push(BusEvent::QueryCompleted {
            target,
            result: result.as_ref().map(|_| ()).map_err(|e| *e),
        });
        self.completed = self.completed.wrapping_add(1);
        reply.signal(result);
    }
}

impl ClientManager for QueryBridge {
    fn name(&self) -> &'static str {
        "QUERY"
    }

    fn offer_work(&mut self, lease: &mut Lease<'_>, _now_ms: u64) {
        if self.in_flight.is_some() {
            return;
        }
        let Ok(pending) = self.shared.requests.try_receive() else {
            return;
        };
        let PendingQuery {
            target,
            payload,
            reply,
        } = pending;

        if target == self.broadcast_address {
            let result = lease
                .notify(FrameKind::Command, target, &payload)
                .map(|()| Payload::new())
                .map_err(|_| QueryError::SendFailed);
            self.complete(target, &reply, result);
            return;
        }
        match lease.request(FrameKind::Command, target, &payload) {
            Ok(()) => self.in_flight = Some(InFlight { target, reply }),
            Err(e) => {
                warn!("QUERY: send to {:#06x} failed: {}", target, e);
                self.complete(target, &reply, Err(QueryError::SendFailed));
            }
        }
    }

    fn handle_response(&mut self, frame: &FrameView<'_>, _now_ms: u64) -> Disposition {
        let Some(flight) = self.in_flight.take_if(|f| f.target == frame.source()) else {
            return Disposition::Ignored;
        };
        let result = if frame.kind() == FrameKind::Nak {
            Err(QueryError::Nak)
        } else {
            Payload::from_slice(frame.payload()).map_err(|()| QueryError::InvalidCommand)
        };
        self.complete(flight.target, &flight.reply, result);
        Disposition::Consumed
    }

    fn handle_timeout(&mut self, _now_ms: u64) {
        if let Some(flight) = self.in_flight.take() {
            self.complete(flight.target, &flight.reply, Err(QueryError::NoReply));
        }
    }
}
