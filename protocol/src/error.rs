use std::fmt;

/// Protocol decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    PacketTooShort { expected: usize, got: usize },
    InvalidHeader(u8),
    InvalidUtf8,
    InvalidAddress,
    Json(String),
    InvalidPayload { op: u8, reason: String },
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::PacketTooShort { expected, got } => {
                write!(f, "packet too short: expected at least {} bytes, got {}", expected, got)
            }
            ProtocolError::InvalidHeader(first) => {
                write!(f, "invalid audio header: first byte 0x{:02x}", first)
            }
            ProtocolError::InvalidUtf8 => {
                write!(f, "invalid UTF-8 encoding")
            }
            ProtocolError::InvalidAddress => {
                write!(f, "discovery response carries no address")
            }
            ProtocolError::Json(msg) => {
                write!(f, "malformed gateway message: {}", msg)
            }
            ProtocolError::InvalidPayload { op, reason } => {
                write!(f, "invalid payload for op {}: {}", op, reason)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Json(e.to_string())
    }
}
