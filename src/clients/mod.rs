//! Bus clients: the four [`ClientManager`](crate::bus::ClientManager)
//! implementations.
//!
//! | Manager            | Traffic                                | Reply |
//! |--------------------|----------------------------------------|-------|
//! | `QueryBridge`      | one external command per call          | yes   |
//! | `TimeBroadcaster`  | RTC broadcast on an interval           | no    |
//! | `TransferManager`  | start / data × N / finish per artifact | yes   |
//! | `LogPollManager`   | status, log, delete per roster device  | mixed |

pub mod log_poll;
pub mod query;
pub mod time_sync;
pub mod transfer;

pub use log_poll::{LogPollManager, PollPhase};
pub use query::{QueryBridge, QueryClient, QueryCommand, QueryError, query_bridge};
pub use time_sync::TimeBroadcaster;
pub use transfer::{
    ArtifactKind, ProtocolVariant, TransferError, TransferManager, TransferOutcome, TransferRequest,
    TransferState,
};
