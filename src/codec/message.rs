//! Conversion between ABCI messages and protocol frames.
//!
//! Encoding writes the variant's tag into the header and the variant's
//! payload struct as MsgPack. Decoding does the reverse and checks the
//! direction flag, so a response can never be mistaken for a request.

use crate::error::{AbciError, Result};
use crate::protocol::{build_frame, flags, Frame, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::types::{MessageKind, Request, Response};

use super::MsgPackCodec;

/// Frame-level codec for [`Request`] and [`Response`].
pub struct MessageCodec;

impl MessageCodec {
    /// Encode a request into a complete frame, limited to the default
    /// maximum payload size.
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        Self::encode_request_with_limit(request, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Encode a request, rejecting payloads larger than `max_payload_size`.
    ///
    /// # Errors
    ///
    /// [`AbciError::Protocol`] if the encoded payload is over the limit. The
    /// peer would reject such a frame, so it is never written.
    pub fn encode_request_with_limit(request: &Request, max_payload_size: u32) -> Result<Vec<u8>> {
        let payload = match request {
            Request::Echo(r) => MsgPackCodec::encode(r)?,
            Request::Flush(r) => MsgPackCodec::encode(r)?,
            Request::Info(r) => MsgPackCodec::encode(r)?,
            Request::SetOption(r) => MsgPackCodec::encode(r)?,
            Request::InitChain(r) => MsgPackCodec::encode(r)?,
            Request::Query(r) => MsgPackCodec::encode(r)?,
            Request::BeginBlock(r) => MsgPackCodec::encode(r)?,
            Request::CheckTx(r) => MsgPackCodec::encode(r)?,
            Request::DeliverTx(r) => MsgPackCodec::encode(r)?,
            Request::EndBlock(r) => MsgPackCodec::encode(r)?,
            Request::Commit(r) => MsgPackCodec::encode(r)?,
        };
        check_payload_size(request.kind(), payload.len(), max_payload_size)?;
        Ok(build_frame(request.kind().as_u8(), flags::REQUEST, &payload))
    }

    /// Encode a response into a complete frame, limited to the default
    /// maximum payload size.
    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Self::encode_response_with_limit(response, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Encode a response, rejecting payloads larger than `max_payload_size`.
    pub fn encode_response_with_limit(response: &Response, max_payload_size: u32) -> Result<Vec<u8>> {
        let payload = match response {
            Response::Exception(r) => MsgPackCodec::encode(r)?,
            Response::Echo(r) => MsgPackCodec::encode(r)?,
            Response::Flush(r) => MsgPackCodec::encode(r)?,
            Response::Info(r) => MsgPackCodec::encode(r)?,
            Response::SetOption(r) => MsgPackCodec::encode(r)?,
            Response::InitChain(r) => MsgPackCodec::encode(r)?,
            Response::Query(r) => MsgPackCodec::encode(r)?,
            Response::BeginBlock(r) => MsgPackCodec::encode(r)?,
            Response::CheckTx(r) => MsgPackCodec::encode(r)?,
            Response::DeliverTx(r) => MsgPackCodec::encode(r)?,
            Response::EndBlock(r) => MsgPackCodec::encode(r)?,
            Response::Commit(r) => MsgPackCodec::encode(r)?,
        };
        check_payload_size(response.kind(), payload.len(), max_payload_size)?;
        Ok(build_frame(response.kind().as_u8(), flags::RESPONSE, &payload))
    }

    /// Decode a request frame.
    ///
    /// # Errors
    ///
    /// - [`AbciError::UnknownMessage`] for tags that are not requests. The
    ///   frame has been fully consumed, so the stream is still aligned.
    /// - [`AbciError::Protocol`] if the frame is flagged as a response.
    /// - [`AbciError::Codec`] if the payload does not decode.
    pub fn decode_request(frame: &Frame) -> Result<Request> {
        if frame.is_response() {
            return Err(AbciError::Protocol(format!(
                "expected request frame, got response (kind tag {})",
                frame.kind()
            )));
        }

        let kind = MessageKind::from_u8(frame.kind()).ok_or(AbciError::UnknownMessage(frame.kind()))?;
        let payload = frame.payload();

        let request = match kind {
            MessageKind::Echo => Request::Echo(MsgPackCodec::decode(payload)?),
            MessageKind::Flush => Request::Flush(MsgPackCodec::decode(payload)?),
            MessageKind::Info => Request::Info(MsgPackCodec::decode(payload)?),
            MessageKind::SetOption => Request::SetOption(MsgPackCodec::decode(payload)?),
            MessageKind::InitChain => Request::InitChain(MsgPackCodec::decode(payload)?),
            MessageKind::Query => Request::Query(MsgPackCodec::decode(payload)?),
            MessageKind::BeginBlock => Request::BeginBlock(MsgPackCodec::decode(payload)?),
            MessageKind::CheckTx => Request::CheckTx(MsgPackCodec::decode(payload)?),
            MessageKind::DeliverTx => Request::DeliverTx(MsgPackCodec::decode(payload)?),
            MessageKind::EndBlock => Request::EndBlock(MsgPackCodec::decode(payload)?),
            MessageKind::Commit => Request::Commit(MsgPackCodec::decode(payload)?),
            MessageKind::Exception => return Err(AbciError::UnknownMessage(frame.kind())),
        };
        Ok(request)
    }

    /// Decode a response frame.
    ///
    /// # Errors
    ///
    /// Same as [`decode_request`](Self::decode_request), with the direction
    /// check reversed.
    pub fn decode_response(frame: &Frame) -> Result<Response> {
        if !frame.is_response() {
            return Err(AbciError::Protocol(format!(
                "expected response frame, got request (kind tag {})",
                frame.kind()
            )));
        }

        let kind = MessageKind::from_u8(frame.kind()).ok_or(AbciError::UnknownMessage(frame.kind()))?;
        let payload = frame.payload();

        let response = match kind {
            MessageKind::Exception => Response::Exception(MsgPackCodec::decode(payload)?),
            MessageKind::Echo => Response::Echo(MsgPackCodec::decode(payload)?),
            MessageKind::Flush => Response::Flush(MsgPackCodec::decode(payload)?),
            MessageKind::Info => Response::Info(MsgPackCodec::decode(payload)?),
            MessageKind::SetOption => Response::SetOption(MsgPackCodec::decode(payload)?),
            MessageKind::InitChain => Response::InitChain(MsgPackCodec::decode(payload)?),
            MessageKind::Query => Response::Query(MsgPackCodec::decode(payload)?),
            MessageKind::BeginBlock => Response::BeginBlock(MsgPackCodec::decode(payload)?),
            MessageKind::CheckTx => Response::CheckTx(MsgPackCodec::decode(payload)?),
            MessageKind::DeliverTx => Response::DeliverTx(MsgPackCodec::decode(payload)?),
            MessageKind::EndBlock => Response::EndBlock(MsgPackCodec::decode(payload)?),
            MessageKind::Commit => Response::Commit(MsgPackCodec::decode(payload)?),
        };
        Ok(response)
    }
}

fn check_payload_size(kind: MessageKind, len: usize, max_payload_size: u32) -> Result<()> {
    if len > max_payload_size as usize {
        return Err(AbciError::Protocol(format!(
            "{} payload size {} exceeds maximum {}",
            kind, len, max_payload_size
        )));
    }
    Ok(())
}
