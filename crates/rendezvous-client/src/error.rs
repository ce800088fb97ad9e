//! Client error types.

use thiserror::Error;

use rendezvous_protocol::{ErrorResponse, ProtocolError};
use rendezvous_server::ServerError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection to the daemon failed.
    #[error("connection error: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("timeout: {0}")]
    Timeout(String),

    /// The daemon answered with an error.
    #[error("{0}")]
    Remote(ErrorResponse),

    /// The daemon answered with something this command does not expect.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Running the daemon in this process failed.
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(ProtocolError::from(err))
    }
}
