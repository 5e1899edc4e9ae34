//! ABCI message types.
//!
//! [`Request`] and [`Response`] are closed enums: every site that handles
//! them (codec, dispatch, matcher) matches exhaustively, so adding a variant
//! is a compile error everywhere it needs handling.
//!
//! [`MessageKind`] names each variant without its payload. It doubles as the
//! wire tag and as the key for matching a response to its request: a response
//! answers a request exactly when their kinds are equal.

mod common;
mod request;
mod response;

use std::fmt;

pub use common::{
    BlockHeader, BlockParams, ConsensusParams, Event, EventAttribute, Evidence, EvidenceParams,
    LastCommitInfo, Timestamp, Validator, ValidatorParams, ValidatorUpdate, VoteInfo,
};
pub use request::{
    CheckTxKind, RequestBeginBlock, RequestCheckTx, RequestCommit, RequestDeliverTx, RequestEcho,
    RequestEndBlock, RequestFlush, RequestInfo, RequestInitChain, RequestQuery, RequestSetOption,
};
pub use response::{
    ResponseBeginBlock, ResponseCheckTx, ResponseCommit, ResponseDeliverTx, ResponseEcho,
    ResponseEndBlock, ResponseException, ResponseFlush, ResponseInfo, ResponseInitChain,
    ResponseQuery, ResponseSetOption, CODE_OK,
};

/// Message variant tag, shared by requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    Echo = 1,
    Flush = 2,
    Info = 3,
    SetOption = 4,
    InitChain = 5,
    Query = 6,
    BeginBlock = 7,
    CheckTx = 8,
    DeliverTx = 9,
    EndBlock = 10,
    Commit = 11,
    /// Response-only: fatal error reported by the server.
    Exception = 12,
}

impl MessageKind {
    /// Wire tag for this kind.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Look up a wire tag. Returns `None` for 0 (reserved) and unknown tags.
    pub fn from_u8(tag: u8) -> Option<Self> {
        let kind = match tag {
            1 => MessageKind::Echo,
            2 => MessageKind::Flush,
            3 => MessageKind::Info,
            4 => MessageKind::SetOption,
            5 => MessageKind::InitChain,
            6 => MessageKind::Query,
            7 => MessageKind::BeginBlock,
            8 => MessageKind::CheckTx,
            9 => MessageKind::DeliverTx,
            10 => MessageKind::EndBlock,
            11 => MessageKind::Commit,
            12 => MessageKind::Exception,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Echo => "Echo",
            MessageKind::Flush => "Flush",
            MessageKind::Info => "Info",
            MessageKind::SetOption => "SetOption",
            MessageKind::InitChain => "InitChain",
            MessageKind::Query => "Query",
            MessageKind::BeginBlock => "BeginBlock",
            MessageKind::CheckTx => "CheckTx",
            MessageKind::DeliverTx => "DeliverTx",
            MessageKind::EndBlock => "EndBlock",
            MessageKind::Commit => "Commit",
            MessageKind::Exception => "Exception",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Request sent from the consensus engine to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Echo(RequestEcho),
    Flush(RequestFlush),
    Info(RequestInfo),
    SetOption(RequestSetOption),
    InitChain(RequestInitChain),
    Query(RequestQuery),
    BeginBlock(RequestBeginBlock),
    CheckTx(RequestCheckTx),
    DeliverTx(RequestDeliverTx),
    EndBlock(RequestEndBlock),
    Commit(RequestCommit),
}

impl Request {
    pub fn kind(&self) -> MessageKind {
        match self {
            Request::Echo(_) => MessageKind::Echo,
            Request::Flush(_) => MessageKind::Flush,
            Request::Info(_) => MessageKind::Info,
            Request::SetOption(_) => MessageKind::SetOption,
            Request::InitChain(_) => MessageKind::InitChain,
            Request::Query(_) => MessageKind::Query,
            Request::BeginBlock(_) => MessageKind::BeginBlock,
            Request::CheckTx(_) => MessageKind::CheckTx,
            Request::DeliverTx(_) => MessageKind::DeliverTx,
            Request::EndBlock(_) => MessageKind::EndBlock,
            Request::Commit(_) => MessageKind::Commit,
        }
    }

    /// Response kind the matcher expects for this request.
    #[inline]
    pub fn expected_response(&self) -> MessageKind {
        self.kind()
    }

    #[inline]
    pub fn is_flush(&self) -> bool {
        matches!(self, Request::Flush(_))
    }

    pub fn echo(message: impl Into<String>) -> Self {
        Request::Echo(RequestEcho {
            message: message.into(),
        })
    }

    pub fn flush() -> Self {
        Request::Flush(RequestFlush {})
    }
}

/// Response sent from the application back to the consensus engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Exception(ResponseException),
    Echo(ResponseEcho),
    Flush(ResponseFlush),
    Info(ResponseInfo),
    SetOption(ResponseSetOption),
    InitChain(ResponseInitChain),
    Query(ResponseQuery),
    BeginBlock(ResponseBeginBlock),
    CheckTx(ResponseCheckTx),
    DeliverTx(ResponseDeliverTx),
    EndBlock(ResponseEndBlock),
    Commit(ResponseCommit),
}

impl Response {
    pub fn kind(&self) -> MessageKind {
        match self {
            Response::Exception(_) => MessageKind::Exception,
            Response::Echo(_) => MessageKind::Echo,
            Response::Flush(_) => MessageKind::Flush,
            Response::Info(_) => MessageKind::Info,
            Response::SetOption(_) => MessageKind::SetOption,
            Response::InitChain(_) => MessageKind::InitChain,
            Response::Query(_) => MessageKind::Query,
            Response::BeginBlock(_) => MessageKind::BeginBlock,
            Response::CheckTx(_) => MessageKind::CheckTx,
            Response::DeliverTx(_) => MessageKind::DeliverTx,
            Response::EndBlock(_) => MessageKind::EndBlock,
            Response::Commit(_) => MessageKind::Commit,
        }
    }

    #[inline]
    pub fn is_flush(&self) -> bool {
        matches!(self, Response::Flush(_))
    }

    pub fn exception(error: impl Into<String>) -> Self {
        Response::Exception(ResponseException {
            error: error.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags_roundtrip() {
        for tag in 1u8..=12 {
            let kind = MessageKind::from_u8(tag).unwrap();
            assert_eq!(kind.as_u8(), tag);
        }
    }

    #[test]
    fn test_reserved_and_unknown_tags() {
        assert_eq!(MessageKind::from_u8(0), None);
        assert_eq!(MessageKind::from_u8(13), None);
        assert_eq!(MessageKind::from_u8(0xFF), None);
    }

    #[test]
    fn test_request_expects_same_kind() {
        let request = Request::DeliverTx(RequestDeliverTx::new(&b"tx"[..]));
        assert_eq!(request.kind(), MessageKind::DeliverTx);
        assert_eq!(request.expected_response(), MessageKind::DeliverTx);
        assert!(!request.is_flush());
        assert!(Request::flush().is_flush());
    }

    #[test]
    fn test_exception_kind() {
        let response = Response::exception("boom");
        assert_eq!(response.kind(), MessageKind::Exception);
        assert_eq!(response.kind().to_string(), "Exception");
    }
}
