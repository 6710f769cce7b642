//! Bus ownership: the byte transport, the transmit lease and the arbiter.
//!
//! ```text
//!  ┌──────────┐ offer_work(lease) ┌──────────────┐  write  ┌───────────┐
//!  │ Managers │◀──────────────────│  BusArbiter  │────────▶│ Transport │
//!  │ (prio)   │──────────────────▶│  (poll loop) │◀────────│ (RS-485)  │
//!  └──────────┘ handle_response / └──────────────┘  read   └───────────┘
//!               handle_timeout
//! ```

pub mod arbiter;
pub mod lease;
pub mod transport;

pub use arbiter::{BusArbiter, BusState, BusStats};
pub use lease::{ClientManager, Disposition, Expect, Lease};
pub use transport::{FrameWriter, NullTransport, Rs485Port, Transport};
