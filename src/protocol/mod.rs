//! Wire protocol of the field bus.
//!
//! ```text
//! ┌───────┬────────┬────────┬─────┬──────────────────┬──────────┬─────┐
//! │ start │ target │ source │  N  │ payload (N B)    │ checksum │ end │
//! │  1 B  │ u16 BE │ u16 BE │ 1 B │ opcode + args    │  u16 BE  │ 1 B │
//! └───────┴────────┴────────┴─────┴──────────────────┴──────────┴─────┘
//!   0       1..=2    3..=4    5     6..6+N            6+N..=7+N  8+N
//! ```
//!
//! The checksum is the 16-bit wrapping sum of the payload bytes.

pub mod frame;
pub mod opcode;

pub use frame::{Frame, FrameAssembler, FrameKind, FrameView, Payload};
pub use opcode::Opcode;
