//! GPIO / peripheral assignments for the gateway board.
//!
//! Single source of truth; `main` references this module rather than
//! hard-coding pin numbers.

// ---------------------------------------------------------------------------
// RS-485 field bus (MAX3485 half-duplex transceiver)
// ---------------------------------------------------------------------------

/// UART peripheral driving the field bus.
pub const BUS_UART_NUM: u8 = 1;
/// UART TX → transceiver DI.
pub const BUS_TX_GPIO: i32 = 17;
/// UART RX ← transceiver RO.
pub const BUS_RX_GPIO: i32 = 18;
/// Driver enable, tied to both DE and /RE.  HIGH = transmit.
pub const BUS_DE_GPIO: i32 = 21;

