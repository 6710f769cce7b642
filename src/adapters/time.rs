//! System time adapter.
//!
//! Provides the monotonic [`Clock`] the bus loop runs on and the UTC
//! [`WallClock`] the time broadcaster reads.
//!
//! - **`target_os = "espidf"`**: monotonic time from `esp_timer_get_time()`
//!   (microsecond precision, survives SNTP steps).
//! - **`not(target_os = "espidf")`**: `std::time::Instant` for host-side
//!   testing and simulation.
//!
//! Wall time comes from `SystemTime` on both; the device sets it via SNTP.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::app::ports::{CalendarTime, Clock, WallClock};

/// Anything earlier is treated as an unsynced clock (2020-01-01T00:00:00Z).
const EPOCH_2020: u64 = 1_577_836_800;

/// Time adapter backed by the platform timer and system clock.
pub struct SystemClock {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    #[cfg(target_os = "espidf")]
    fn now_ms(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64 / 1_000
    }

    #[cfg(not(target_os = "espidf"))]
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl WallClock for SystemClock {
    fn now(&self) -> Option<CalendarTime> {
        let secs = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs();
        if secs < EPOCH_2020 {
            return None;
        }
        Some(calendar_from_unix(secs))
    }
}

/// Break a Unix timestamp into UTC calendar fields.
///
/// Days-to-civil conversion after Howard Hinnant's `civil_from_days`.
pub fn calendar_from_unix(secs: u64) -> CalendarTime {
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;

    // 1970-01-01 was a Thursday (ISO weekday 4).
    let weekday = ((days + 3).rem_euclid(7) + 1) as u8;

    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = (yoe + era * 400 + i64::from(month <= 2)) as u16;

    CalendarTime {
        year,
        month,
        day,
        weekday,
        hour: (rem / 3_600) as u8,
        minute: (rem / 60 % 60) as u8,
        second: (rem % 60) as u8,
    }
}
