//! IPC framing, request/response types and notification events.
//!
//! # Protocol Overview
//!
//! Messages are sent as length-prefixed JSON:
//! - 4 bytes: message length (u32, big-endian)
//! - N bytes: JSON payload
//!
//! Every message is wrapped in an [`Envelope`] carrying the protocol version
//! and a request id. A `subscribe` request switches the connection into a
//! stream of [`Response::Event`] frames.
//!
//! # Example
//!
//! ```rust
//! use rendezvous_protocol::{Envelope, Request, encode_message, decode_message};
//!
//! let request = Envelope::request("req-123", Request::Ping);
//! let bytes = encode_message(&request).unwrap();
//! let decoded: Envelope<Request> = decode_message(&bytes).unwrap();
//! assert_eq!(decoded, request);
//! ```

mod error;
mod events;
mod framing;
mod types;

pub use error::{ProtocolError, ProtocolResult};
pub use events::NotificationEvent;
pub use framing::{HEADER_LEN, decode_message, encode_message, payload_len};
pub use types::{
    EntryOutcome, Envelope, ErrorCode, ErrorResponse, ReportCompletion, Request, Response,
    StatusInfo,
};

/// Protocol version constant.
pub const PROTOCOL_VERSION: &str = "1";

/// Maximum message size (1 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;
