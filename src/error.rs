//! Error types for abci-socket.
//!
//! Errors are `Clone` because the first fatal error on a client connection is
//! kept as a sticky error and handed to every caller still waiting on it.

use std::sync::Arc;

use thiserror::Error;

use crate::types::MessageKind;

/// Main error type for all ABCI socket operations.
#[derive(Debug, Clone, Error)]
pub enum AbciError {
    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),

    /// The peer closed the stream at a frame boundary.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed frame (bad flags, oversized payload, truncated stream).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// MsgPack payload could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Frame carried a message tag this side does not understand.
    #[error("Unknown message type: {0}")]
    UnknownMessage(u8),

    /// Response variant does not match the oldest pending request.
    #[error("Unexpected response: expected {expected}, received {received}")]
    UnexpectedResponse {
        /// Variant the oldest pending request expects.
        expected: MessageKind,
        /// Variant that actually arrived.
        received: MessageKind,
    },

    /// Response arrived while no request was pending.
    #[error("Unsolicited response: {0}")]
    UnsolicitedResponse(MessageKind),

    /// Server reported a fatal error with an Exception response.
    #[error("Application exception: {0}")]
    Exception(String),

    /// Application panicked while handling a request.
    #[error("Application panicked: {0}")]
    ApplicationPanic(String),

    /// Client was stopped without a fatal error.
    #[error("Client stopped")]
    Stopped,

    /// `start()` called on a client or server that already started.
    #[error("Already started")]
    AlreadyStarted,

    /// Connection string could not be parsed.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

impl From<std::io::Error> for AbciError {
    fn from(err: std::io::Error) -> Self {
        AbciError::Io(Arc::new(err))
    }
}

impl From<rmp_serde::encode::Error> for AbciError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        AbciError::Codec(format!("encode: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for AbciError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        AbciError::Codec(format!("decode: {}", err))
    }
}

/// Result type alias using AbciError.
pub type Result<T> = std::result::Result<T, AbciError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_shared_between_clones() {
        let err = AbciError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset by peer",
        ));
        let copy = err.clone();

        match (&err, &copy) {
            (AbciError::Io(a), AbciError::Io(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected Io errors"),
        }
        assert!(copy.to_string().contains("reset by peer"));
    }

    #[test]
    fn test_unexpected_response_message() {
        let err = AbciError::UnexpectedResponse {
            expected: MessageKind::DeliverTx,
            received: MessageKind::Echo,
        };
        assert_eq!(
            err.to_string(),
            "Unexpected response: expected DeliverTx, received Echo"
        );
    }
}
