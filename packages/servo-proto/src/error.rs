//! Deterministic decode-failure taxonomy for the servo frame codec.

use thiserror::Error;

/// Every decode error is a pure function of the input bytes — the codec
/// never retries and never performs I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame too short: need at least {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    #[error("bad header byte: expected {expected:#04x}, got {got:#04x}")]
    BadHeader { expected: u8, got: u8 },

    #[error("checksum mismatch: frame says {in_frame:#04x}, computed {computed:#04x}")]
    BadChecksum { in_frame: u8, computed: u8 },

    #[error("address mismatch: expected {expected}, got {got}")]
    AddressMismatch { expected: u8, got: u8 },

    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),

    #[error("payload has wrong length for this command: need {need}, got {got}")]
    BadPayloadLen { need: usize, got: usize },

    #[error("invalid value {value:#04x} for field {field}")]
    BadEnumValue { field: &'static str, value: u8 },
}
