//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements          | Connects to                 |
//! |----------------|---------------------|-----------------------------|
//! | `file_stream`  | StreamSource        | SPIFFS / host directory     |
//! | `log_sink`     | EventSink           | Serial log output           |
//! | `memory`       | StreamSource        | RAM-staged artifacts        |
//! |                | RecordStore         | Bounded RAM log FIFO        |
//! | `time`         | Clock, WallClock    | ESP32 system timer, SNTP    |
//! | `uart`         | Transport           | ESP-IDF UART (RS-485)       |

pub mod file_stream;
pub mod log_sink;
pub mod memory;
pub mod time;
#[cfg(feature = "espidf")]
pub mod uart;
