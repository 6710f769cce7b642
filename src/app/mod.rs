//! Application core: bus orchestration, zero I/O.
//!
//! [`service::BusService`] wires the arbiter to its clients and turns
//! [`commands::BusCommand`]s into manager calls.  Artifacts, records, time
//! and event delivery all come in through the **port traits** in
//! [`ports`], so this layer runs unchanged on the host test harness.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod status;
