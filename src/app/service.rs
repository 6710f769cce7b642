//! Bus service: the hexagonal core.
//!
//! [`BusService`] owns the arbiter and the five bus clients.  Everything
//! outside the bus thread talks to it through [`BusCommand`]s or the
//! [`QueryClient`]; everything it observes leaves through an
//! [`EventSink`].  The transport, artifact source, record store and wall
//! clock are injected, so the whole service runs against mocks.
//!
//! ```text
//!  BusCommand ──▶ ┌─────────────────────────────┐ ──▶ EventSink
//!                 │         BusService           │
//!  QueryClient ──▶│  Arbiter · Query · Time ·    │ ──▶ StatusBoard
//!                 │  Transfer ×2 · LogPoll       │
//!                 └──────────────┬──────────────┘
//!                                ▼
//!                            Transport
//! ```
//!
//! Lease priority is fixed by slot order: query, time, primary transfer,
//! secondary transfer, log poll.

use std::sync::Arc;

use log::{info, warn};

use crate::bus::{BusArbiter, ClientManager, Transport};
use crate::clients::log_poll::LogPollManager;
use crate::clients::query::{QueryBridge, QueryClient, query_bridge};
use crate::clients::time_sync::TimeBroadcaster;
use crate::clients::transfer::TransferManager;
use crate::config::BusConfig;
use crate::error::Result;

use super::commands::{BusCommand, TransferSlot};
use super::events::{BusEvent, EventQueue};
use super::ports::{EventSink, RecordStore, StreamSource, WallClock};
use super::status::StatusBoard;

// ───────────────────────────────────────────────────────────────
// Priority slots
// ───────────────────────────────────────────────────────────────

pub const QUERY_SLOT: usize = 0;
pub const TIME_SLOT: usize = 1;
pub const PRIMARY_SLOT: usize = 2;
pub const SECONDARY_SLOT: usize = 3;
pub const POLL_SLOT: usize = 4;

impl TransferSlot {
    const fn arbiter_index(self) -> usize {
        match self {
            Self::Primary => PRIMARY_SLOT,
            Self::Secondary => SECONDARY_SLOT,
        }
    }

    const fn board_index(self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Secondary => 1,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// BusService
// ───────────────────────────────────────────────────────────────

pub struct BusService<T, S, R, W>
where
    T: Transport,
    S: StreamSource,
    R: RecordStore,
    W: WallClock,
{
    arbiter: BusArbiter<T>,
    query: QueryBridge,
    time: TimeBroadcaster<W>,
    primary: TransferManager<S>,
    secondary: TransferManager<S>,
    log_poll: LogPollManager<R>,
    status: Arc<StatusBoard>,
}

impl<T, S, R, W> BusService<T, S, R, W>
where
    T: Transport,
    S: StreamSource + Clone,
    R: RecordStore,
    W: WallClock,
{
    /// Build the service and the query handle that feeds its bridge.
    ///
    /// Each transfer manager gets its own clone of `source`.  The
    /// configuration is validated first; nothing is sent until [`poll`].
    ///
    /// [`poll`]: Self::poll
    pub fn new(
        transport: T,
        source: S,
        store: R,
        clock: W,
        config: &BusConfig,
    ) -> Result<(Self, QueryClient)> {
        config.validate()?;
        let (query, client) = query_bridge(config);
        let service = Self {
            arbiter: BusArbiter::new(transport, config),
            query,
            time: TimeBroadcaster::new(clock, config),
            primary: TransferManager::new("XFER-A", source.clone(), config),
            secondary: TransferManager::new("XFER-B", source, config),
            log_poll: LogPollManager::new(store, config),
            status: Arc::new(StatusBoard::new()),
        };
        info!(
            "BusService ready: interface {:#06x}, {} roster devices",
            config.interface_address,
            config.roster.len()
        );
        Ok((service, client))
    }
}

impl<T, S, R, W> BusService<T, S, R, W>
where
    T: Transport,
    S: StreamSource,
    R: RecordStore,
    W: WallClock,
{
    // ── Per-poll orchestration ────────────────────────────────

    /// Run one arbiter step, then forward whatever the clients reported.
    pub fn poll(&mut self, now_ms: u64, sink: &mut dyn EventSink) {
        {
            let mut clients: [&mut dyn ClientManager; 5] = [
                &mut self.query,
                &mut self.time,
                &mut self.primary,
                &mut self.secondary,
                &mut self.log_poll,
            ];
            self.arbiter.poll(&mut clients, now_ms);
        }
        self.forward_events(sink);
        self.publish_status();
    }

    fn forward_events(&mut self, sink: &mut dyn EventSink) {
        let status = &self.status;
        let queues: [&mut EventQueue; 5] = [
            self.query.events(),
            self.time.events(),
            self.primary.events(),
            self.secondary.events(),
            self.log_poll.events(),
        ];
        for queue in queues {
            if queue.dropped() > 0 && !queue.is_empty() {
                warn!("BusService: {} events lost to overflow", queue.dropped());
            }
            while let Some(event) = queue.pop() {
                match event {
                    BusEvent::LogStored { .. } => status.record_log_stored(),
                    BusEvent::TimeBroadcast(_) => status.record_time_broadcast(),
                    BusEvent::QueryCompleted { .. } => status.record_query(),
                    _ => {}
                }
                sink.emit(&event);
            }
        }
    }

    fn publish_status(&self) {
        self.status.publish_bus(
            self.arbiter.state(),
            self.arbiter.lease_holder(),
            &self.arbiter.stats(),
        );
        self.status.publish_transfer(0, &self.primary.progress());
        self.status.publish_transfer(1, &self.secondary.progress());
        self.status
            .publish_poll(self.log_poll.is_active(), self.log_poll.cycles());
    }

    // ── Command handling ──────────────────────────────────────

    /// Apply an external command.  Cancelling a manager that holds the
    /// lease revokes it, freeing the bus after the turnaround guard.
    pub fn handle_command(&mut self, cmd: BusCommand) -> Result<()> {
        match cmd {
            BusCommand::StartTransfer { slot, request } => {
                self.transfer_mut(slot).start(request)?;
            }
            BusCommand::StopTransfer(slot) => {
                if self.transfer_mut(slot).stop() {
                    self.arbiter.revoke(slot.arbiter_index());
                }
                self.status
                    .publish_transfer(slot.board_index(), &self.transfer(slot).progress());
            }
            BusCommand::StartPolling => {
                self.log_poll.start();
            }
            BusCommand::StopPolling => {
                if self.log_poll.stop() {
                    self.arbiter.revoke(POLL_SLOT);
                }
            }
            BusCommand::LoadRoster(roster) => {
                self.arbiter.revoke(POLL_SLOT);
                self.log_poll.load_roster(roster);
            }
            BusCommand::BroadcastTimeNow => {
                self.time.trigger();
            }
        }
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn status(&self) -> Arc<StatusBoard> {
        Arc::clone(&self.status)
    }

    pub fn arbiter(&self) -> &BusArbiter<T> {
        &self.arbiter
    }

    pub fn arbiter_mut(&mut self) -> &mut BusArbiter<T> {
        &mut self.arbiter
    }

    pub fn transfer(&self, slot: TransferSlot) -> &TransferManager<S> {
        match slot {
            TransferSlot::Primary => &self.primary,
            TransferSlot::Secondary => &self.secondary,
        }
    }

    pub fn transfer_mut(&mut self, slot: TransferSlot) -> &mut TransferManager<S> {
        match slot {
            TransferSlot::Primary => &mut self.primary,
            TransferSlot::Secondary => &mut self.secondary,
        }
    }

    pub fn log_poll(&self) -> &LogPollManager<R> {
        &self.log_poll
    }

    pub fn time(&self) -> &TimeBroadcaster<W> {
        &self.time
    }

    pub fn query_bridge(&self) -> &QueryBridge {
        &self.query
    }
}

// ───────────────────────────────────────────────────────────────
// Tests
// ───────────────────────────────────────────────────────────────
