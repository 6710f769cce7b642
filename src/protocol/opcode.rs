//! Opcodes carried in the first payload byte.

/// Semantic operation selected by the first payload byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // ── Log harvesting ────────────────────────────────────
    StatusQuery = 0x10,
    LogQuery = 0x11,
    LogDelete = 0x12,

    // ── Time ──────────────────────────────────────────────
    RtcSet = 0x20,

    // ── Multi-packet transfer ─────────────────────────────
    TransferStart = 0x30,
    TransferData = 0x31,
    TransferFinish = 0x32,

    // ── Device settings (synchronous queries) ─────────────
    DigitalOutputSet = 0x40,
    RoomTemperatureSet = 0x41,
    DisplayBrightnessSet = 0x42,
    SystemIdSet = 0x43,
    BusReconfigure = 0x44,

    // ── Secondary bus forwarding ──────────────────────────
    BridgeWrap = 0x50,
}

impl Opcode {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x10 => Some(Self::StatusQuery),
            0x11 => Some(Self::LogQuery),
            0x12 => Some(Self::LogDelete),
            0x20 => Some(Self::RtcSet),
            0x30 => Some(Self::TransferStart),
            0x31 => Some(Self::TransferData),
            0x32 => Some(Self::TransferFinish),
            0x40 => Some(Self::DigitalOutputSet),
            0x41 => Some(Self::RoomTemperatureSet),
            0x42 => Some(Self::DisplayBrightnessSet),
            0x43 => Some(Self::SystemIdSet),
            0x44 => Some(Self::BusReconfigure),
            0x50 => Some(Self::BridgeWrap),
            _ => None,
        }
    }
}
