//! Transport module - socket handling for both sides of a connection.
//!
//! Provides abstraction over:
//! - TCP sockets (Nagle disabled)
//! - Unix Domain Sockets (Linux/macOS)

mod address;
mod listener;
mod stream;

pub use address::Address;
pub use listener::Listener;
pub use stream::Transport;
