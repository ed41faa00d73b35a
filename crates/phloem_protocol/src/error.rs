//! Protocol error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid opcode: {0}")]
    InvalidOpCode(u8),

    #[error("invalid object request type: {0}")]
    InvalidRequestType(u8),

    #[error("invalid object response type: {0}")]
    InvalidResponseType(u8),

    #[error("header too short: expected {expected} bytes, got {got}")]
    HeaderTooShort { expected: usize, got: usize },

    #[error("protocol version mismatch: expected {expected:#04x}, got {got:#04x}")]
    VersionMismatch { expected: u8, got: u8 },

    #[error("expected {expected} frames, got {got}")]
    InvalidFrameCount { expected: usize, got: usize },

    #[error("payload length mismatch: header says {expected}, got {got}")]
    PayloadLengthMismatch { expected: usize, got: usize },

    #[error("payload too large: {size} bytes exceeds {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}
