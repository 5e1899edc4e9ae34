//! Per-connection workers.
//!
//! Each accepted connection gets three tasks:
//! - reader: decode a request, dispatch it under the application lock, push
//!   the response onto the connection's bounded queue
//! - writer: drain the queue in order into a buffered writer, flushing on
//!   Flush and Exception responses
//! - supervisor: wait for either side to finish, close the other, and remove
//!   the connection from the registry

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, warn};

use super::{dispatch, ServerConfig, ServerShared};
use crate::application::Application;
use crate::codec::MessageCodec;
use crate::error::{AbciError, Result};
use crate::protocol::FrameBuffer;
use crate::transport::Transport;
use crate::types::Response;

/// Socket read chunk size (64KB).
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Response write buffer size (64KB).
const WRITE_BUFFER_SIZE: usize = 64 * 1024;

/// Registry entry for a live connection.
pub(crate) struct ConnectionHandle {
    tasks: [AbortHandle; 3],
}

impl ConnectionHandle {
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Start the workers for an accepted connection.
///
/// The caller inserts the returned handle into the registry while holding
/// the registry lock, so the supervisor's removal always comes after it.
pub(crate) fn spawn<A: Application>(
    conn_id: u64,
    transport: Transport,
    app: Arc<AsyncMutex<A>>,
    shared: Arc<ServerShared>,
    config: &ServerConfig,
) -> ConnectionHandle {
    let (read_half, write_half) = transport.into_split();
    let (responses_tx, responses_rx) = mpsc::channel(config.response_queue_capacity.max(1));

    let reader = {
        let shared = shared.clone();
        let max = config.max_message_size;
        tokio::spawn(async move {
            read_requests(conn_id, read_half, app, responses_tx, &shared, max).await
        })
    };
    let writer = tokio::spawn(write_responses(
        write_half,
        responses_rx,
        config.max_message_size,
    ));

    let reader_abort = reader.abort_handle();
    let writer_abort = writer.abort_handle();
    let supervisor = tokio::spawn(supervise(conn_id, reader, writer, shared));

    ConnectionHandle {
        tasks: [reader_abort, writer_abort, supervisor.abort_handle()],
    }
}

async fn supervise(
    conn_id: u64,
    mut reader: JoinHandle<Result<()>>,
    mut writer: JoinHandle<Result<()>>,
    shared: Arc<ServerShared>,
) {
    tokio::select! {
        result = &mut reader => {
            log_exit(conn_id, "reader", result);
            // The reader's queue sender is gone; the writer drains and exits.
            log_exit(conn_id, "writer", writer.await);
        }
        result = &mut writer => {
            log_exit(conn_id, "writer", result);
            reader.abort();
            let _ = reader.await;
        }
    }

    shared.remove_connection(conn_id);
    debug!(conn_id, "Connection closed");
}

fn log_exit(conn_id: u64, worker: &str, result: std::result::Result<Result<()>, tokio::task::JoinError>) {
    match result {
        Ok(Ok(())) => debug!(conn_id, worker, "Worker finished"),
        Ok(Err(AbciError::Io(e))) => debug!(conn_id, worker, error = %e, "Connection I/O ended"),
        Ok(Err(e)) => warn!(conn_id, worker, error = %e, "Connection failed"),
        Err(e) if e.is_cancelled() => debug!(conn_id, worker, "Worker cancelled"),
        Err(e) => error!(conn_id, worker, error = %e, "Worker panicked"),
    }
}

/// Read and dispatch requests until EOF or a fatal error.
async fn read_requests<A, R>(
    conn_id: u64,
    mut reader: R,
    app: Arc<AsyncMutex<A>>,
    responses: mpsc::Sender<Response>,
    shared: &ServerShared,
    max_message_size: u32,
) -> Result<()>
where
    A: Application,
    R: AsyncRead + Unpin,
{
    let mut frames = FrameBuffer::with_max_payload(max_message_size);
    let mut chunk = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if frames.is_empty() {
                return Ok(());
            }
            return Err(AbciError::Protocol(format!(
                "stream ended inside a frame ({} bytes buffered)",
                frames.len()
            )));
        }

        for frame in frames.push(&chunk[..n])? {
            let request = match MessageCodec::decode_request(&frame) {
                Ok(request) => request,
                Err(AbciError::UnknownMessage(tag)) => {
                    warn!(conn_id, tag, "Unknown request, closing connection");
                    shared.metrics.record_exception();
                    enqueue(&responses, Response::exception(format!("unknown request: tag {}", tag)))
                        .await?;
                    return Err(AbciError::UnknownMessage(tag));
                }
                Err(e) => return Err(e),
            };

            let kind = request.kind();
            let result = {
                let mut app = app.lock().await;
                dispatch::handle_request(&mut *app, request)
            };
            shared.metrics.record_request();

            match result {
                Ok(response) => enqueue(&responses, response).await?,
                Err(e) => {
                    error!(conn_id, %kind, error = %e, "Application fault, closing connection");
                    shared.metrics.record_exception();
                    enqueue(&responses, Response::exception(e.to_string())).await?;
                    return Err(e);
                }
            }
        }
    }
}

async fn enqueue(responses: &mpsc::Sender<Response>, response: Response) -> Result<()> {
    responses
        .send(response)
        .await
        .map_err(|_| AbciError::ConnectionClosed)
}

/// Write responses in queue order until the reader drops its sender.
async fn write_responses<W>(
    writer: W,
    mut responses: mpsc::Receiver<Response>,
    max_message_size: u32,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, writer);

    while let Some(response) = responses.recv().await {
        let bytes = MessageCodec::encode_response_with_limit(&response, max_message_size)?;
        writer.write_all(&bytes).await?;

        if matches!(response, Response::Flush(_) | Response::Exception(_)) {
            writer.flush().await?;
        }
    }

    writer.flush().await?;
    writer.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, flags};
    use crate::types::{RequestDeliverTx, ResponseDeliverTx};
    use tokio::io::duplex;

    struct Doubler;

    impl Application for Doubler {
        fn deliver_tx(&mut self, request: RequestDeliverTx) -> ResponseDeliverTx {
            if request.tx.is_empty() {
                panic!("empty tx");
            }
            let mut data = request.tx.to_vec();
            data.extend_from_slice(&request.tx);
            ResponseDeliverTx {
                data: data.into(),
                ..Default::default()
            }
        }
    }

    async fn read_responses<R: AsyncRead + Unpin>(stream: &mut R) -> Vec<Response> {
        let mut frames = FrameBuffer::new();
        let mut out = Vec::new();
        let mut chunk = vec![0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).await.unwrap();
            if n == 0 {
                return out;
            }
            for frame in frames.push(&chunk[..n]).unwrap() {
                out.push(MessageCodec::decode_response(&frame).unwrap());
            }
        }
    }

    fn request_bytes(requests: &[crate::types::Request]) -> Vec<u8> {
        requests
            .iter()
            .flat_map(|r| MessageCodec::encode_request(r).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_reader_answers_in_order_and_stops_at_unknown() {
        let shared = Arc::new(ServerShared::default());
        let app = Arc::new(AsyncMutex::new(Doubler));
        let (tx, mut rx) = mpsc::channel(16);

        let mut input = request_bytes(&[crate::types::Request::DeliverTx(RequestDeliverTx::new(
            &b"ab"[..],
        ))]);
        input.extend(build_frame(0x7f, flags::REQUEST, b"\x80"));
        input.extend(request_bytes(&[crate::types::Request::flush()]));

        let (mut client, server) = duplex(4096);
        client.write_all(&input).await.unwrap();
        drop(client);

        let err = read_requests(1, server, app, tx, &shared, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, AbciError::UnknownMessage(0x7f)));

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, Response::DeliverTx(ref r) if r.data.as_ref() == b"abab"));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, Response::Exception(ref e) if e.error.contains("unknown request")));
        // The Flush after the unknown frame is never dispatched.
        assert!(rx.recv().await.is_none());

        assert_eq!(shared.metrics.requests_handled(), 1);
        assert_eq!(shared.metrics.exceptions_sent(), 1);
    }

    #[tokio::test]
    async fn test_application_panic_queues_exception_then_stops() {
        let shared = Arc::new(ServerShared::default());
        let app = Arc::new(AsyncMutex::new(Doubler));
        let (tx, mut rx) = mpsc::channel(16);

        let input = request_bytes(&[
            crate::types::Request::DeliverTx(RequestDeliverTx::default()),
            crate::types::Request::flush(),
        ]);
        let (mut client, server) = duplex(4096);
        client.write_all(&input).await.unwrap();

        let err = read_requests(1, server, app.clone(), tx, &shared, 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, AbciError::ApplicationPanic(_)));

        let only = rx.recv().await.unwrap();
        assert!(matches!(only, Response::Exception(ref e) if e.error.contains("empty tx")));
        assert!(rx.recv().await.is_none());

        // Lock was released.
        assert!(app.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_truncated_stream_is_protocol_error() {
        let shared = Arc::new(ServerShared::default());
        let app = Arc::new(AsyncMutex::new(Doubler));
        let (tx, _rx) = mpsc::channel(16);

        let bytes = request_bytes(&[crate::types::Request::echo("cut")]);
        let (mut client, server) = duplex(4096);
        client.write_all(&bytes[..bytes.len() - 1]).await.unwrap();
        drop(client);

        let err = read_requests(1, server, app, tx, &shared, 1024).await.unwrap_err();
        assert!(matches!(err, AbciError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_writer_flushes_in_order_and_closes() {
        let (tx, rx) = mpsc::channel(16);
        let (writer_side, mut reader_side) = duplex(64 * 1024);

        tx.send(Response::Echo(crate::types::ResponseEcho {
            message: "one".to_string(),
        }))
        .await
        .unwrap();
        tx.send(Response::Flush(crate::types::ResponseFlush {})).await.unwrap();
        drop(tx);

        write_responses(writer_side, rx, 1024).await.unwrap();

        let responses = read_responses(&mut reader_side).await;
        assert_eq!(responses.len(), 2);
        assert!(matches!(responses[0], Response::Echo(ref r) if r.message == "one"));
        assert!(responses[1].is_flush());
    }
}
