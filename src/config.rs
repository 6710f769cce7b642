//! Bus master configuration parameters
//!
//! Every component receives the values it needs from [`BusConfig`] at
//! construction.  Nothing reads configuration from global state.

use heapless::Vec;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Upper bound on the device roster (one transceiver segment).
pub const MAX_DEVICES: usize = 64;

/// Ordered, bounded list of device bus addresses.
pub type Roster = Vec<u16, MAX_DEVICES>;

/// Core bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    // --- Addressing ---
    /// Our own interface address; frames to any other target are ignored.
    pub interface_address: u16,
    /// Address every device accepts without replying.
    pub broadcast_address: u16,
    /// Our address on the secondary segment behind a bus coupler.
    pub secondary_interface_address: u8,

    // --- Line timing ---
    /// UART baud rate of the primary segment.
    pub baud_rate: u32,
    /// Longest wait for a terminated reply after a request (milliseconds).
    pub response_timeout_ms: u32,
    /// Longest silence between two bytes of one frame (milliseconds).
    pub inter_byte_timeout_ms: u32,
    /// Guard time between the end of one transaction and the next send.
    pub turnaround_ms: u32,

    // --- Transfer ---
    /// Resends allowed per awaited acknowledgement.
    pub transfer_retries: u8,

    // --- Log polling ---
    /// Minimum quiet time before the poller transmits again (milliseconds).
    pub poll_quiet_ms: u32,
    /// Resends of a log request before the poller moves on.
    pub log_retries: u8,
    /// Devices polled in round-robin order.
    pub roster: Roster,

    // --- Time broadcast ---
    /// Interval between RTC broadcasts (seconds).
    pub time_broadcast_interval_secs: u32,

    // --- Synchronous queries ---
    /// Caller-side bound on one query.  Must exceed two worst-case bus
    /// transactions: the one a queued query waits behind, then its own.
    pub query_timeout_ms: u32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            // Addressing
            interface_address: 0x0001,
            broadcast_address: 0xFFFF,
            secondary_interface_address: 0x01,

            // Line timing
            baud_rate: 38_400,
            response_timeout_ms: 200,
            inter_byte_timeout_ms: 20,
            turnaround_ms: 2,

            // Transfer
            transfer_retries: 3,

            // Log polling
            poll_quiet_ms: 10,
            log_retries: 2,
            roster: Vec::new(),

            // Time broadcast
            time_broadcast_interval_secs: 3600, // hourly

            // Queries
            query_timeout_ms: 2000,
        }
    }
}

impl BusConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        let config: Self =
            serde_json::from_str(text).map_err(|_| Error::Config("malformed configuration"))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would break addressing or stall a session.
    pub fn validate(&self) -> Result<(), Error> {
        if self.interface_address == self.broadcast_address {
            return Err(Error::Config("interface address equals broadcast address"));
        }
        if self.response_timeout_ms == 0 {
            return Err(Error::Config("response timeout must be non-zero"));
        }
        if self.inter_byte_timeout_ms >= self.response_timeout_ms {
            return Err(Error::Config("inter-byte timeout must be below response timeout"));
        }
        if self.transfer_retries == 0 || self.log_retries == 0 {
            return Err(Error::Config("retry budgets must be at least 1"));
        }
        // A queued query may first wait out the current holder's transaction.
        if u64::from(self.query_timeout_ms) <= 2 * self.worst_case_transaction_ms() {
            return Err(Error::Config("query timeout must exceed two bus transactions"));
        }
        if self.time_broadcast_interval_secs == 0 {
            return Err(Error::Config("time broadcast interval must be non-zero"));
        }
        for (i, addr) in self.roster.iter().enumerate() {
            if *addr == self.interface_address || *addr == self.broadcast_address {
                return Err(Error::Config("roster contains a reserved address"));
            }
            if self.roster[..i].contains(addr) {
                return Err(Error::Config("roster contains a duplicate address"));
            }
        }
        Ok(())
    }

    /// Longest a single bus transaction can take, turnaround included.
    pub fn worst_case_transaction_ms(&self) -> u64 {
        u64::from(self.response_timeout_ms) + u64::from(self.turnaround_ms)
    }
}
