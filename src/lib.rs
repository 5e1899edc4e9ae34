//! # abci-socket
//!
//! Socket transport for the Application Blockchain Interface (ABCI): a
//! pipelined client for the consensus engine and a multi-connection server
//! for the application, speaking length-prefixed MsgPack frames over TCP or
//! Unix domain sockets.
//!
//! ## Architecture
//!
//! - **Client**: requests are queued, written in batches on Flush, and
//!   matched to responses strictly in order. The first connection failure
//!   is sticky and resolves every outstanding call.
//! - **Server**: one reader and one writer per connection; all requests pass
//!   through a single [`Application`] one at a time.
//!
//! ## Example
//!
//! ```ignore
//! use abci_socket::{Application, Server, SocketClient};
//!
//! struct App;
//! impl Application for App {}
//!
//! #[tokio::main]
//! async fn main() -> abci_socket::Result<()> {
//!     let mut server = Server::new("tcp://127.0.0.1:26658", App)?;
//!     server.start().await?;
//!
//!     let client = SocketClient::new("tcp://127.0.0.1:26658", true)?;
//!     client.start().await?;
//!     assert_eq!(client.echo("hi").await?.message, "hi");
//!
//!     client.stop().await;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod transport;
pub mod types;

mod application;
mod client;
mod server;

pub use application::Application;
pub use client::{
    CallResult, ClientBuilder, ClientConfig, ClientState, PendingCall, ResponseCallback,
    SocketClient, DEFAULT_DIAL_RETRY_INTERVAL, DEFAULT_FLUSH_INTERVAL, DEFAULT_QUEUE_CAPACITY,
};
pub use error::{AbciError, Result};
pub use server::{Server, ServerConfig, ServerMetrics, DEFAULT_RESPONSE_QUEUE_CAPACITY};
pub use transport::Address;
pub use types::*;
