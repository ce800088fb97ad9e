//! Length-prefixed message framing for IPC.
//!
//! ```text
//! +----------------+------------------+
//! | length (4 BE)  |  JSON payload    |
//! +----------------+------------------+
//! ```
//!
//! The async socket code on both ends reads the 4-byte header, validates it
//! with [`payload_len`], then reads exactly that many bytes.

use serde::{Serialize, de::DeserializeOwned};

use crate::MAX_MESSAGE_SIZE;
use crate::error::{ProtocolError, ProtocolResult};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 4;

/// Encodes a message to bytes with length prefix.
///
/// # Example
///
/// ```rust
/// use rendezvous_protocol::{encode_message, Envelope, Request};
///
/// let envelope = Envelope::request("req-1", Request::Ping);
/// let bytes = encode_message(&envelope).unwrap();
/// assert!(bytes.len() > 4);
/// ```
pub fn encode_message<T: Serialize>(message: &T) -> ProtocolResult<Vec<u8>> {
    let json = serde_json::to_vec(message)?;
    if json.len() > MAX_MESSAGE_SIZE as usize {
        return Err(ProtocolError::MessageTooLarge {
            size: json.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buffer = Vec::with_capacity(HEADER_LEN + json.len());
    buffer.extend_from_slice(&(json.len() as u32).to_be_bytes());
    buffer.extend_from_slice(&json);
    Ok(buffer)
}

/// Validates a length prefix and returns the payload size it announces.
pub fn payload_len(header: [u8; HEADER_LEN]) -> ProtocolResult<usize> {
    let len = u32::from_be_bytes(header);
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len as usize,
            max: MAX_MESSAGE_SIZE,
        });
    }
    if len == 0 {
        return Err(ProtocolError::EmptyMessage);
    }
    Ok(len as usize)
}

/// Decodes a complete framed message (length prefix + payload).
pub fn decode_message<T: DeserializeOwned>(data: &[u8]) -> ProtocolResult<T> {
    let Some((header, rest)) = data.split_first_chunk::<HEADER_LEN>() else {
        return Err(ProtocolError::IncompleteMessage {
            expected: HEADER_LEN,
            received: data.len(),
        });
    };

    let len = payload_len(*header)?;
    if rest.len() < len {
        return Err(ProtocolError::IncompleteMessage {
            expected: HEADER_LEN + len,
            received: data.len(),
        });
    }

    Ok(serde_json::from_slice(&rest[..len])?)
}
