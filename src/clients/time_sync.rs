//! Periodic RTC broadcast.
//!
//! Payload: `[0x20, weekday, day, month, year % 100, hour, minute, second]`,
//! every field packed BCD.  Sent to the broadcast address; devices never
//! answer, so the lease ends as soon as the frame is out.

use log::{info, trace, warn};

use crate::app::events::{BusEvent, EventQueue};
use crate::app::ports::{CalendarTime, WallClock};
use crate::bus::{ClientManager, Disposition, Lease};
use crate::config::BusConfig;
use crate::protocol::frame::FrameKind;
use crate::protocol::{FrameView, Opcode};

/// Packed BCD of a value below 100.
pub const fn to_bcd(value: u8) -> u8 {
    let v = value % 100;
    ((v / 10) << 4) | (v % 10)
}

pub fn rtc_payload(time: &CalendarTime) -> [u8; 8] {
    [
        Opcode::RtcSet.code(),
        to_bcd(time.weekday),
        to_bcd(time.day),
        to_bcd(time.month),
        to_bcd((time.year % 100) as u8),
        to_bcd(time.hour),
        to_bcd(time.minute),
        to_bcd(time.second),
    ]
}

pub struct TimeBroadcaster<W: WallClock> {
    clock: W,
    broadcast_address: u16,
    interval_ms: u64,
    last_sent: Option<u64>,
    forced: bool,
    sent: u32,
    events: EventQueue,
}

impl<W: WallClock> TimeBroadcaster<W> {
    pub fn new(clock: W, config: &BusConfig) -> Self {
        Self {
            clock,
            broadcast_address: config.broadcast_address,
            interval_ms: u64::from(config.time_broadcast_interval_secs) * 1000,
            last_sent: None,
            forced: false,
            sent: 0,
            events: EventQueue::new(),
        }
    }

    /// Broadcast on the next free bus slot regardless of the interval.
    pub fn trigger(&mut self) {
        self.forced = true;
    }

    /// Broadcasts sent since construction.
    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn events(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    fn due(&self, now_ms: u64) -> bool {
        self.forced
            || self
                .last_sent
                .is_none_or(|t| now_ms.saturating_sub(t) >= self.interval_ms)
    }
}

impl<W: WallClock> ClientManager for TimeBroadcaster<W> {
    fn name(&self) -> &'static str {
        "TIME"
    }

    fn offer_work(&mut self, lease: &mut Lease<'_>, now_ms: u64) {
        if !self.due(now_ms) {
            return;
        }
        let Some(time) = self.clock.now() else {
            trace!("TIME: wall clock not set, broadcast deferred");
            return;
        };
        let payload = rtc_payload(&time);
        match lease.notify(FrameKind::Command, self.broadcast_address, &payload) {
            Ok(()) => {
                info!(
                    "TIME: broadcast 20{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
                    time.year % 100,
                    time.month,
                    time.day,
                    time.hour,
                    time.minute,
                    time.second
                );
                self.last_sent = Some(now_ms);
                self.forced = false;
                self.sent = self.sent.wrapping_add(1);
                self.events.push(BusEvent::TimeBroadcast(time));
            }
            Err(e) => warn!("TIME: broadcast failed: {}", e),
        }
    }

    fn handle_response(&mut self, _frame: &FrameView<'_>, _now_ms: u64) -> Disposition {
        Disposition::Ignored
    }

    fn handle_timeout(&mut self, _now_ms: u64) {}
}
