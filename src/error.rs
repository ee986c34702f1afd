//! Error kinds reported by the host-side ISP client and ICP driver.
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Reply missing, short, or otherwise not a 64-byte packet.
    #[error("framing error: {0}")]
    Framing(String),

    /// The bootloader answered with an inverted checksum.
    #[error("command 0x{command:02x} rejected by device")]
    Nack { command: u8 },

    #[error("checksum mismatch: expected 0x{expected:04x}, got 0x{actual:04x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u16, actual: u16 },

    #[error("unexpected device id 0x{actual:04x} (expected 0x{expected:04x})")]
    DeviceMismatch { expected: u16, actual: u16 },

    #[error("device is locked")]
    Locked,

    #[error("verify failed at 0x{address:05x}: expected 0x{expected:02x}, read 0x{actual:02x}")]
    VerifyMismatch {
        address: u32,
        expected: u8,
        actual: u8,
    },

    #[error("pin driver initialization failed: {0}")]
    PinInit(String),

    #[error("programming interface not initialized")]
    NotInitialized,

    #[error("invalid address range 0x{start:05x}..0x{end:05x}")]
    InvalidRange { start: u32, end: u32 },

    #[error("chip database: {0}")]
    ChipDb(String),

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port: {0}")]
    Serial(#[from] serialport::Error),
}
