//! Server error types.

use std::io;
use thiserror::Error;

use rendezvous_core::MeetingStatus;
use rendezvous_protocol::{ErrorCode, ErrorResponse};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket, file, etc.).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (framing, encoding, etc.).
    #[error("Protocol error: {0}")]
    Protocol(#[from] rendezvous_protocol::ProtocolError),

    /// No meeting with this id.
    #[error("Meeting not found: {meeting_id}")]
    MeetingNotFound { meeting_id: String },

    /// The meeting's status does not allow the requested action.
    #[error("Cannot {action} meeting {meeting_id} while {from}")]
    InvalidTransition {
        meeting_id: String,
        from: MeetingStatus,
        action: &'static str,
    },

    /// The request itself is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The persistence collaborator failed.
    #[error("Store error: {message}")]
    Store { message: String },

    /// A persistence call made from a job callback ran past its deadline.
    #[error("Timed out during {operation}")]
    Timeout { operation: String },

    /// Socket path already in use.
    #[error("Socket path already in use: {path}")]
    SocketInUse { path: String },

    /// Socket path parent directory does not exist.
    #[error("Socket path parent directory does not exist: {path}")]
    SocketPathInvalid { path: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Shutdown requested.
    #[error("Server shutdown requested")]
    Shutdown,
}

impl ServerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn not_found(meeting_id: impl Into<String>) -> Self {
        Self::MeetingNotFound {
            meeting_id: meeting_id.into(),
        }
    }

    pub fn invalid_transition(
        meeting_id: impl Into<String>,
        from: MeetingStatus,
        action: &'static str,
    ) -> Self {
        Self::InvalidTransition {
            meeting_id: meeting_id.into(),
            from,
            action,
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn socket_in_use(path: impl Into<String>) -> Self {
        Self::SocketInUse { path: path.into() }
    }

    pub fn socket_path_invalid(path: impl Into<String>) -> Self {
        Self::SocketPathInvalid { path: path.into() }
    }

    /// Protocol error code reported to IPC clients.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MeetingNotFound { .. } => ErrorCode::NotFound,
            Self::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Shutdown => ErrorCode::ShuttingDown,
            Self::InvalidRequest { .. } | Self::Protocol(_) => ErrorCode::InvalidRequest,
            _ => ErrorCode::InternalError,
        }
    }

    /// Converts into the wire error payload.
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.code(), self.to_string())
    }
}
