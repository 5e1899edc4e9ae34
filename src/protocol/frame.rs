//! Frame struct with typed accessors.
//!
//! Represents a complete protocol frame with header and payload.
//! Uses `bytes::Bytes` for zero-copy payload sharing.

use bytes::Bytes;

use super::wire_format::{Header, HEADER_SIZE};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Get the raw kind tag.
    #[inline]
    pub fn kind(&self) -> u8 {
        self.header.kind
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }
}

/// Build a complete frame as a single byte vector.
///
/// The header's `payload_length` is taken from `payload`, which must fit in
/// a `u32`. [`MessageCodec`](crate::codec::MessageCodec) checks the size
/// limit before calling this.
///
/// # Example
///
/// ```
/// use abci_socket::protocol::{build_frame, flags};
///
/// let bytes = build_frame(1, flags::REQUEST, b"hello");
/// assert_eq!(bytes.len(), 6 + 5);
/// ```
pub fn build_frame(kind: u8, flags: u8, payload: &[u8]) -> Vec<u8> {
    let header = Header::new(kind, flags, payload.len() as u32);
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}
