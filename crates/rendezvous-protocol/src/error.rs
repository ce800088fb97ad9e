//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum allowed size.
    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: u32 },

    /// Failed to encode or decode JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Peer speaks another protocol version.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection closed before the full frame arrived.
    #[error("incomplete message: expected {expected} bytes, got {received}")]
    IncompleteMessage { expected: usize, received: usize },

    /// Zero-length frame.
    #[error("empty message")]
    EmptyMessage,

    #[error("timeout during {operation}")]
    Timeout { operation: String },
}

impl ProtocolError {
    /// Creates a timeout error for the named operation.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}
