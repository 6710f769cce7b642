//! Field-bus master library.
//!
//! Exposes the bus core for integration testing and for the firmware
//! binary.  All ESP-IDF-specific code is guarded by `cfg` attributes
//! within each module, so the crate builds and tests on the host.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod bus;
pub mod bus_task;
pub mod clients;
pub mod config;
pub mod error;
pub mod pins;
pub mod protocol;
