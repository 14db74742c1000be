//! Error types for the voicegate SDK.

use thiserror::Error;
use voicegate_protocol::ProtocolError;

/// Errors surfaced by voice connection operations.
#[derive(Error, Debug, Clone)]
pub enum SdkError {
    /// A handle the operation would create is already open.
    #[error("{0} already open")]
    AlreadyOpen(&'static str),

    /// A prerequisite of the operation has not happened yet.
    #[error("not ready: {0}")]
    NotReady(&'static str),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected from voice gateway")]
    Disconnected,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Ciphertext failed authentication. Dropped on the data plane, never handed to consumers.
    #[error("packet failed authentication")]
    Authentication,

    #[error("Timeout exceeded {0}")]
    Timeout(String),

    /// The parent session could not deliver a request.
    #[error("Session error: {0}")]
    Session(String),
}

impl SdkError {
    /// True for precondition failures, which leave the connection untouched.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        matches!(self, SdkError::AlreadyOpen(_) | SdkError::NotReady(_))
    }
}

impl From<std::io::Error> for SdkError {
    fn from(e: std::io::Error) -> Self {
        SdkError::ConnectionFailed(e.to_string())
    }
}
