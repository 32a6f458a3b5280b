//! Frame codec — one encoded message per frame.
//!
//! A frame on the wire is a 4-byte little-endian payload length followed by
//! the payload bytes. The payload of the first frame on a connection is the
//! peer's raw identity bytes; every later payload is one JSON-encoded
//! [`Message`]. The codec knows nothing about connections, only about the
//! bytes of a single frame.

use bytes::Bytes;

use crate::message::Message;

/// Size of the length prefix preceding every payload.
pub const LEN_PREFIX: usize = 4;

/// Upper bound on a single payload. A length prefix above this is framing
/// corruption, not a large message: the stream cannot be resynchronized
/// past it.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors that can arise when interpreting one frame's payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The payload is not a well-formed message. Non-fatal: the frame is
    /// dropped and the connection continues.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Encode a message into one frame payload.
///
/// Cannot fail for messages built through the [`Message`] constructors;
/// construction is the only place an invalid message could arise.
pub fn encode(msg: &Message) -> Bytes {
    Bytes::from(serde_json::to_vec(msg).expect("message serialization failed"))
}

/// Decode one frame payload.
pub fn decode(payload: &[u8]) -> Result<Message, CodecError> {
    Ok(serde_json::from_slice(payload)?)
}
