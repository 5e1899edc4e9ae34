//! Client connection workers.
//!
//! ```text
//! queue_request ─► mpsc ─► write_loop ─► BufWriter ─► socket
//!                              │
//!                              └─► pending list ◄── read_loop ◄── socket
//! ```
//!
//! The writer records each call as pending before its bytes leave, so the
//! reader can never see a response for a call it does not know about.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use super::Inner;
use crate::codec::MessageCodec;
use crate::error::{AbciError, Result};
use crate::protocol::FrameBuffer;
use crate::types::Response;

/// Socket read chunk size (64KB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Write buffer size (64KB). Requests accumulate here until a Flush.
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Drain the request queue onto the socket.
///
/// Returns only on failure, or `Ok(())` once the queue is closed by teardown.
pub(super) async fn write_loop<W>(inner: &Inner, writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut requests = inner.requests_rx.lock().await;
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, writer);

    while let Some(call) = requests.recv().await {
        let sent = async {
            let bytes = MessageCodec::encode_request_with_limit(
                call.request(),
                inner.config.max_message_size,
            )?;
            inner.will_send(&call)?;
            writer.write_all(&bytes).await?;
            Ok::<_, AbciError>(())
        }
        .await;

        if let Err(e) = sent {
            // Not in the pending list, so teardown would not reach it.
            call.complete(Err(e.clone()));
            return Err(e);
        }

        if call.request().is_flush() {
            writer.flush().await?;
            tracing::trace!("Flushed request buffer");
        }
    }

    Ok(())
}

/// Decode responses and resolve pending calls in order.
///
/// Never returns `Ok`: the loop ends on the first error, including a clean
/// end of stream.
pub(super) async fn read_loop<R>(inner: &Inner, mut reader: R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::with_max_payload(inner.config.max_message_size);
    let mut chunk = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(if frames.is_empty() {
                AbciError::ConnectionClosed
            } else {
                AbciError::Protocol(format!(
                    "stream ended inside a frame ({} bytes buffered)",
                    frames.len()
                ))
            });
        }

        for frame in frames.push(&chunk[..n])? {
            let response = MessageCodec::decode_response(&frame)?;

            if let Response::Exception(exception) = response {
                return Err(AbciError::Exception(exception.error));
            }

            let call = inner.match_response(response.kind())?;
            tracing::trace!(kind = %response.kind(), "Received response");

            call.complete(Ok(response.clone()));
            inner.notify_response(call.request(), &response);
        }
    }
}
