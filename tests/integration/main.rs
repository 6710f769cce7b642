//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a subsystem against
//! the simulated bus in [`mock_bus`].  All tests run on the host with no
//! real hardware required.

// Links embassy-time's host `std` time driver, needed by async-io-mini timers.
use embassy_time as _;

mod log_poll_tests;
mod mock_bus;
mod query_bridge_tests;
mod service_tests;
mod transfer_flow_tests;
