//! The application side of ABCI.
//!
//! The server owns one `Application` behind a mutex and calls it for every
//! request from every connection, one at a time. Methods take `&mut self`
//! and return the response directly; Echo and Flush never reach the
//! application.
//!
//! Every method has a default that returns an empty OK response, so an
//! application implements only what it needs.
//!
//! # Example
//!
//! ```
//! use abci_socket::{Application, RequestDeliverTx, ResponseDeliverTx};
//!
//! #[derive(Default)]
//! struct TxCounter {
//!     delivered: u64,
//! }
//!
//! impl Application for TxCounter {
//!     fn deliver_tx(&mut self, _request: RequestDeliverTx) -> ResponseDeliverTx {
//!         self.delivered += 1;
//!         ResponseDeliverTx::default()
//!     }
//! }
//! ```

use crate::types::*;

/// State machine driven by the consensus engine.
///
/// A panic in any method is caught by the server, reported to the client as
/// an Exception, and closes the connection that sent the request.
pub trait Application: Send + 'static {
    /// Application version and last committed state.
    fn info(&mut self, _request: RequestInfo) -> ResponseInfo {
        ResponseInfo::default()
    }

    /// Non-consensus-critical configuration.
    fn set_option(&mut self, _request: RequestSetOption) -> ResponseSetOption {
        ResponseSetOption::default()
    }

    /// Called once, on genesis.
    fn init_chain(&mut self, _request: RequestInitChain) -> ResponseInitChain {
        ResponseInitChain::default()
    }

    /// Read-only state query.
    fn query(&mut self, _request: RequestQuery) -> ResponseQuery {
        ResponseQuery::default()
    }

    /// Validate a transaction for the mempool.
    fn check_tx(&mut self, _request: RequestCheckTx) -> ResponseCheckTx {
        ResponseCheckTx::default()
    }

    fn begin_block(&mut self, _request: RequestBeginBlock) -> ResponseBeginBlock {
        ResponseBeginBlock::default()
    }

    /// Execute a transaction. Repeated transactions are delivered again;
    /// rejecting duplicates is up to the application.
    fn deliver_tx(&mut self, _request: RequestDeliverTx) -> ResponseDeliverTx {
        ResponseDeliverTx::default()
    }

    fn end_block(&mut self, _request: RequestEndBlock) -> ResponseEndBlock {
        ResponseEndBlock::default()
    }

    /// Persist state and return the app hash.
    fn commit(&mut self, _request: RequestCommit) -> ResponseCommit {
        ResponseCommit::default()
    }
}
