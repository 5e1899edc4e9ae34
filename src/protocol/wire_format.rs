//! Wire format encoding and decoding.
//!
//! Implements the 6-byte header format:
//! ```text
//! ┌────────┬───────┬──────────┐
//! │ Kind   │ Flags │ Length   │
//! │ 1 byte │ 1 byte│ 4 bytes  │
//! │ u8     │       │ uint32 BE│
//! └────────┴───────┴──────────┘
//! ```
//!
//! `Kind` is the [`MessageKind`](crate::types::MessageKind) tag of the
//! payload. All multi-byte integers are Big Endian.

use crate::error::{AbciError, Result};

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Default maximum payload size (100 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 100 * 1024 * 1024;

/// Reserved kind tag (never sent).
pub const RESERVED_KIND: u8 = 0;

/// Flag constants for the protocol.
pub mod flags {
    /// Message type: response (1) or request (0).
    pub const IS_RESPONSE: u8 = 0b0000_0001;

    /// Reserved bits mask (bits 1-7).
    pub const RESERVED_MASK: u8 = 0b1111_1110;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }

    /// Request flags.
    pub const REQUEST: u8 = 0;
    /// Response flags.
    pub const RESPONSE: u8 = IS_RESPONSE;
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Message kind tag (0 reserved).
    pub kind: u8,
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(kind: u8, flags: u8, payload_length: u32) -> Self {
        Self {
            kind,
            flags,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use abci_socket::protocol::{Header, flags};
    ///
    /// let header = Header::new(1, flags::RESPONSE, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes, [1, 1, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.kind;
        buf[1] = self.flags;
        buf[2..6].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            kind: buf[0],
            flags: buf[1],
            payload_length: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Payload length doesn't exceed max
    /// - Reserved flag bits are 0
    ///
    /// Unknown kind tags are not rejected here: the frame is still well formed
    /// and the codec reports the tag once the payload has been consumed.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(AbciError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(AbciError::Protocol(format!(
                "Reserved flag bits must be 0 (flags = {:#010b})",
                self.flags
            )));
        }

        Ok(())
    }

    /// Check if this is a response.
    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_RESPONSE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encode_decode_roundtrip() {
        let original = Header::new(9, flags::RESPONSE, 4242);
        let decoded = Header::decode(&original.encode()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_header_big_endian_byte_order() {
        let bytes = Header::new(0x0B, 0x01, 0x0102_0304).encode();

        assert_eq!(bytes[0], 0x0B);
        assert_eq!(bytes[1], 0x01);
        assert_eq!(&bytes[2..], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        let buf = [0u8; HEADER_SIZE - 1];
        assert!(Header::decode(&buf).is_none());
    }

    #[test]
    fn test_validate_payload_too_large() {
        let header = Header::new(1, 0, 1_000_000);
        let result = header.validate(100);
        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_validate_reserved_bits_must_be_zero() {
        let header = Header::new(1, 0b1000_0000, 0);
        let result = header.validate(DEFAULT_MAX_PAYLOAD_SIZE);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Reserved flag bits"));
    }

    #[test]
    fn test_validate_accepts_unknown_kind() {
        let header = Header::new(0x7F, flags::REQUEST, 0);
        assert!(header.validate(DEFAULT_MAX_PAYLOAD_SIZE).is_ok());
        assert!(!header.is_response());
    }
}
