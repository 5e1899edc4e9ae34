//! Codec module - payload serialization and message framing.
//!
//! - [`MsgPackCodec`] - MessagePack for payload structs (`rmp-serde`, named fields)
//! - [`MessageCodec`] - [`Request`](crate::types::Request) /
//!   [`Response`](crate::types::Response) to and from complete frames
//!
//! Codecs are marker structs with static methods rather than trait objects,
//! so the codec is fixed at compile time.
//!
//! # Example
//!
//! ```
//! use abci_socket::codec::MessageCodec;
//! use abci_socket::protocol::FrameBuffer;
//! use abci_socket::types::Request;
//!
//! let bytes = MessageCodec::encode_request(&Request::echo("hello")).unwrap();
//!
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&bytes).unwrap();
//! let decoded = MessageCodec::decode_request(&frames[0]).unwrap();
//! assert_eq!(decoded, Request::echo("hello"));
//! ```

mod message;
mod msgpack;

pub use message::MessageCodec;
pub use msgpack::MsgPackCodec;
