//! ABCI socket client.
//!
//! The client pipelines requests over one connection. Each request is queued
//! and handed back as a [`PendingCall`]; a writer task streams queued
//! requests into a buffered socket writer, and a reader task pairs each
//! response with the oldest outstanding call.
//!
//! Requests only hit the wire on Flush. The blocking wrappers (`echo`,
//! `deliver_tx`, ...) queue a Flush after their request; the `*_async`
//! variants rely on the flush timer or an explicit [`SocketClient::flush`].
//!
//! Any connection failure is sticky: the first error stops the client and
//! resolves every outstanding call with that error.
//!
//! # Example
//!
//! ```ignore
//! use abci_socket::SocketClient;
//!
//! let client = SocketClient::new("tcp://127.0.0.1:26658", true)?;
//! client.start().await?;
//!
//! let echo = client.echo("hello").await?;
//! assert_eq!(echo.message, "hello");
//!
//! client.stop().await;
//! ```

mod flush_timer;
mod io;
mod pending;

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{AbciError, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::transport::{Address, Transport};
use crate::types::*;

use self::flush_timer::FlushTimer;
use self::pending::PendingQueue;

pub use self::pending::{CallResult, PendingCall};

/// Default request queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default delay before the flush timer injects a Flush.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(20);

/// Default delay between connection attempts in lenient mode.
pub const DEFAULT_DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Observer invoked for every matched request/response pair.
pub type ResponseCallback = Arc<dyn Fn(&Request, &Response) + Send + Sync + 'static>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Fail `start()` on the first connection error instead of retrying.
    pub must_connect: bool,
    /// Request queue capacity. Callers wait when it is full.
    pub queue_capacity: usize,
    /// Flush timer interval.
    pub flush_interval: Duration,
    /// Retry interval for lenient connects.
    pub dial_retry_interval: Duration,
    /// Largest accepted response payload.
    pub max_message_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            must_connect: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            dial_retry_interval: DEFAULT_DIAL_RETRY_INTERVAL,
            max_message_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Client lifecycle.
#[derive(Debug, Clone)]
pub enum ClientState {
    NotStarted,
    /// Dialing (and possibly retrying).
    Connecting,
    Running,
    /// Tearing down; calls are being failed.
    Stopping,
    /// Terminal. Carries the error that stopped the client, or `None` after
    /// a clean [`stop`](SocketClient::stop).
    Stopped(Option<AbciError>),
}

/// State guarded by the client's single mutex.
struct Shared {
    state: ClientState,
    error: Option<AbciError>,
    pending: PendingQueue,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    address: Address,
    config: ClientConfig,
    shared: Mutex<Shared>,
    requests: mpsc::Sender<PendingCall>,
    requests_rx: tokio::sync::Mutex<mpsc::Receiver<PendingCall>>,
    flush_timer: FlushTimer,
    response_callback: RwLock<Option<ResponseCallback>>,
    /// Set once teardown begins.
    closing: watch::Sender<bool>,
    /// Set once teardown has drained the queue.
    closed: watch::Sender<bool>,
}

impl Inner {
    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sticky_error(&self) -> Option<AbciError> {
        self.shared().error.clone()
    }

    /// Record a call as sent. Fails once the connection is torn down.
    fn will_send(&self, call: &PendingCall) -> Result<()> {
        let mut shared = self.shared();
        if let Some(err) = &shared.error {
            return Err(err.clone());
        }
        shared.pending.push(call.clone());
        Ok(())
    }

    fn match_response(&self, kind: MessageKind) -> Result<PendingCall> {
        self.shared().pending.match_response(kind)
    }

    fn notify_response(&self, request: &Request, response: &Response) {
        let callback = self
            .response_callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(request, response);
        }
    }

    /// Begin teardown with `err`. Only the first error sticks.
    ///
    /// Fails every call already sent, aborts the workers, and spawns the
    /// async half that drains the queue.
    fn fail(self: &Arc<Self>, err: AbciError) {
        let (calls, tasks) = {
            let mut shared = self.shared();
            if shared.error.is_some() {
                return;
            }
            shared.error = Some(err.clone());
            shared.state = ClientState::Stopping;
            (shared.pending.drain(), std::mem::take(&mut shared.tasks))
        };

        match &err {
            AbciError::Stopped => {
                tracing::info!(address = %self.address, "ABCI client stopping")
            }
            e => tracing::error!(address = %self.address, error = %e, "ABCI client failed"),
        }

        self.closing.send_replace(true);
        for task in &tasks {
            task.abort();
        }
        for call in calls {
            call.complete(Err(err.clone()));
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(Self::finish_teardown(self.clone(), tasks, err));
            }
            Err(_) => tracing::debug!("No runtime, skipping queue drain"),
        }
    }

    async fn finish_teardown(self: Arc<Self>, tasks: Vec<JoinHandle<()>>, err: AbciError) {
        for task in tasks {
            let _ = task.await;
        }

        let mut requests = self.requests_rx.lock().await;
        requests.close();
        let mut drained = 0usize;
        while let Ok(call) = requests.try_recv() {
            call.complete(Err(err.clone()));
            drained += 1;
        }
        drop(requests);

        // will_send may have raced the first drain.
        let late = self.shared().pending.drain();
        for call in late {
            call.complete(Err(err.clone()));
        }

        self.shared().state = match err {
            AbciError::Stopped => ClientState::Stopped(None),
            err => ClientState::Stopped(Some(err)),
        };
        self.closed.send_replace(true);
        tracing::debug!(address = %self.address, drained, "ABCI client stopped");
    }
}

/// Pipelined ABCI client over TCP or a Unix socket.
///
/// Share between tasks with `Arc<SocketClient>`. Dropping the client tears
/// down its connection.
pub struct SocketClient {
    inner: Arc<Inner>,
}

impl SocketClient {
    /// Create a client for `address` with default settings.
    ///
    /// With `must_connect = false`, `start()` retries until it connects or
    /// the client is stopped.
    pub fn new(address: &str, must_connect: bool) -> Result<Self> {
        Self::builder(address).must_connect(must_connect).build()
    }

    pub fn builder(address: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            address: address.into(),
            config: ClientConfig::default(),
        }
    }

    /// Create a client from a parsed address and a full config.
    pub fn with_config(address: Address, config: ClientConfig) -> Self {
        let (requests, requests_rx) = mpsc::channel(config.queue_capacity.max(1));
        let inner = Inner {
            address,
            flush_timer: FlushTimer::new(config.flush_interval),
            config,
            shared: Mutex::new(Shared {
                state: ClientState::NotStarted,
                error: None,
                pending: PendingQueue::default(),
                tasks: Vec::new(),
            }),
            requests,
            requests_rx: tokio::sync::Mutex::new(requests_rx),
            response_callback: RwLock::new(None),
            closing: watch::channel(false).0,
            closed: watch::channel(false).0,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn address(&self) -> &Address {
        &self.inner.address
    }

    /// Connect and start the workers.
    ///
    /// # Errors
    ///
    /// - [`AbciError::AlreadyStarted`] if `start()` was already called.
    /// - The connection error in strict mode; the client is then stopped.
    /// - The sticky error if the client was stopped while connecting.
    pub async fn start(&self) -> Result<()> {
        {
            let mut shared = self.inner.shared();
            if let Some(err) = &shared.error {
                return Err(err.clone());
            }
            match shared.state {
                ClientState::NotStarted => shared.state = ClientState::Connecting,
                _ => return Err(AbciError::AlreadyStarted),
            }
        }

        let transport = match self.connect().await {
            Ok(transport) => transport,
            Err(err) => {
                self.inner.fail(err.clone());
                return Err(self.inner.sticky_error().unwrap_or(err));
            }
        };
        let (read_half, write_half) = transport.into_split();

        let mut shared = self.inner.shared();
        if let Some(err) = &shared.error {
            return Err(err.clone());
        }

        let writer = {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if let Err(e) = io::write_loop(&inner, write_half).await {
                    inner.fail(e);
                }
            })
        };
        let reader = {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if let Err(e) = io::read_loop(&inner, read_half).await {
                    inner.fail(e);
                }
            })
        };
        let timer = {
            let inner = self.inner.clone();
            tokio::spawn(async move { inner.flush_timer.run(&inner.requests).await })
        };

        shared.tasks.extend([writer, reader, timer]);
        shared.state = ClientState::Running;
        tracing::info!(address = %self.inner.address, "ABCI client connected");
        Ok(())
    }

    async fn connect(&self) -> Result<Transport> {
        let mut closing = self.inner.closing.subscribe();

        loop {
            match Transport::connect(&self.inner.address).await {
                Ok(transport) => return Ok(transport),
                Err(e) if self.inner.config.must_connect => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        address = %self.inner.address,
                        error = %e,
                        retry_in = ?self.inner.config.dial_retry_interval,
                        "ABCI connection failed, retrying"
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.inner.config.dial_retry_interval) => {}
                _ = closing.wait_for(|closing| *closing) => {
                    return Err(self.inner.sticky_error().unwrap_or(AbciError::Stopped));
                }
            }
        }
    }

    /// Stop the client and wait for teardown to finish.
    ///
    /// Outstanding calls resolve with [`AbciError::Stopped`]. Calling `stop`
    /// on a client that already failed just waits for teardown.
    pub async fn stop(&self) {
        self.inner.fail(AbciError::Stopped);
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    pub fn state(&self) -> ClientState {
        self.inner.shared().state.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.inner.shared().state, ClientState::Running)
    }

    /// The error that stopped the client, if any. `None` after a clean stop.
    pub fn error(&self) -> Option<AbciError> {
        match self.inner.sticky_error() {
            Some(AbciError::Stopped) | None => None,
            Some(err) => Some(err),
        }
    }

    /// Install the global response observer, replacing any previous one.
    ///
    /// Runs on the reader task for every matched pair, after the call's own
    /// callback. It does not see failed calls.
    pub fn set_response_callback<F>(&self, callback: F)
    where
        F: Fn(&Request, &Response) + Send + Sync + 'static,
    {
        *self
            .inner
            .response_callback
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(callback));
    }

    /// Queue a request.
    ///
    /// Waits while the queue is full. The request is written on the next
    /// Flush, either explicit or from the flush timer.
    pub async fn queue_request(&self, request: Request) -> Result<PendingCall> {
        if let Some(err) = self.inner.sticky_error() {
            return Err(err);
        }

        let is_flush = request.is_flush();
        let call = PendingCall::new(request);

        if let Err(mpsc::error::SendError(call)) = self.inner.requests.send(call.clone()).await {
            let err = self.inner.sticky_error().unwrap_or(AbciError::Stopped);
            call.complete(Err(err.clone()));
            return Err(err);
        }

        if is_flush {
            self.inner.flush_timer.unset();
        } else {
            self.inner.flush_timer.set();
        }
        Ok(call)
    }

    /// Queue `request`, force a flush, and wait for the response.
    async fn call(&self, request: Request) -> Result<Response> {
        let call = self.queue_request(request).await?;
        self.flush().await?;
        call.wait().await
    }

    // ------------------------------------------------------------------
    // Queued variants
    // ------------------------------------------------------------------

    pub async fn echo_async(&self, message: impl Into<String>) -> Result<PendingCall> {
        self.queue_request(Request::echo(message)).await
    }

    pub async fn flush_async(&self) -> Result<PendingCall> {
        self.queue_request(Request::flush()).await
    }

    pub async fn info_async(&self, request: RequestInfo) -> Result<PendingCall> {
        self.queue_request(Request::Info(request)).await
    }

    pub async fn set_option_async(&self, request: RequestSetOption) -> Result<PendingCall> {
        self.queue_request(Request::SetOption(request)).await
    }

    pub async fn deliver_tx_async(&self, request: RequestDeliverTx) -> Result<PendingCall> {
        self.queue_request(Request::DeliverTx(request)).await
    }

    pub async fn check_tx_async(&self, request: RequestCheckTx) -> Result<PendingCall> {
        self.queue_request(Request::CheckTx(request)).await
    }

    pub async fn commit_async(&self) -> Result<PendingCall> {
        self.queue_request(Request::Commit(RequestCommit {})).await
    }

    pub async fn query_async(&self, request: RequestQuery) -> Result<PendingCall> {
        self.queue_request(Request::Query(request)).await
    }

    pub async fn init_chain_async(&self, request: RequestInitChain) -> Result<PendingCall> {
        self.queue_request(Request::InitChain(request)).await
    }

    pub async fn begin_block_async(&self, request: RequestBeginBlock) -> Result<PendingCall> {
        self.queue_request(Request::BeginBlock(request)).await
    }

    pub async fn end_block_async(&self, request: RequestEndBlock) -> Result<PendingCall> {
        self.queue_request(Request::EndBlock(request)).await
    }

    // ------------------------------------------------------------------
    // Blocking variants
    // ------------------------------------------------------------------

    pub async fn echo(&self, message: impl Into<String>) -> Result<ResponseEcho> {
        match self.call(Request::echo(message)).await? {
            Response::Echo(r) => Ok(r),
            other => Err(mismatch(MessageKind::Echo, &other)),
        }
    }

    /// Queue a Flush and wait until the server has answered everything
    /// queued before it.
    pub async fn flush(&self) -> Result<()> {
        let call = self.flush_async().await?;
        match call.wait().await? {
            Response::Flush(_) => Ok(()),
            other => Err(mismatch(MessageKind::Flush, &other)),
        }
    }

    pub async fn info(&self, request: RequestInfo) -> Result<ResponseInfo> {
        match self.call(Request::Info(request)).await? {
            Response::Info(r) => Ok(r),
            other => Err(mismatch(MessageKind::Info, &other)),
        }
    }

    pub async fn set_option(&self, request: RequestSetOption) -> Result<ResponseSetOption> {
        match self.call(Request::SetOption(request)).await? {
            Response::SetOption(r) => Ok(r),
            other => Err(mismatch(MessageKind::SetOption, &other)),
        }
    }

    pub async fn deliver_tx(&self, request: RequestDeliverTx) -> Result<ResponseDeliverTx> {
        match self.call(Request::DeliverTx(request)).await? {
            Response::DeliverTx(r) => Ok(r),
            other => Err(mismatch(MessageKind::DeliverTx, &other)),
        }
    }

    pub async fn check_tx(&self, request: RequestCheckTx) -> Result<ResponseCheckTx> {
        match self.call(Request::CheckTx(request)).await? {
            Response::CheckTx(r) => Ok(r),
            other => Err(mismatch(MessageKind::CheckTx, &other)),
        }
    }

    pub async fn commit(&self) -> Result<ResponseCommit> {
        match self.call(Request::Commit(RequestCommit {})).await? {
            Response::Commit(r) => Ok(r),
            other => Err(mismatch(MessageKind::Commit, &other)),
        }
    }

    pub async fn query(&self, request: RequestQuery) -> Result<ResponseQuery> {
        match self.call(Request::Query(request)).await? {
            Response::Query(r) => Ok(r),
            other => Err(mismatch(MessageKind::Query, &other)),
        }
    }

    pub async fn init_chain(&self, request: RequestInitChain) -> Result<ResponseInitChain> {
        match self.call(Request::InitChain(request)).await? {
            Response::InitChain(r) => Ok(r),
            other => Err(mismatch(MessageKind::InitChain, &other)),
        }
    }

    pub async fn begin_block(&self, request: RequestBeginBlock) -> Result<ResponseBeginBlock> {
        match self.call(Request::BeginBlock(request)).await? {
            Response::BeginBlock(r) => Ok(r),
            other => Err(mismatch(MessageKind::BeginBlock, &other)),
        }
    }

    pub async fn end_block(&self, request: RequestEndBlock) -> Result<ResponseEndBlock> {
        match self.call(Request::EndBlock(request)).await? {
            Response::EndBlock(r) => Ok(r),
            other => Err(mismatch(MessageKind::EndBlock, &other)),
        }
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.inner.fail(AbciError::Stopped);
    }
}

impl std::fmt::Debug for SocketClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketClient")
            .field("address", &self.inner.address)
            .field("state", &self.state())
            .finish()
    }
}

/// The matcher already checked the variant, so this only fires if a call's
/// response was produced some other way.
fn mismatch(expected: MessageKind, received: &Response) -> AbciError {
    AbciError::UnexpectedResponse {
        expected,
        received: received.kind(),
    }
}

/// Builder for [`SocketClient`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    address: String,
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn must_connect(mut self, must_connect: bool) -> Self {
        self.config.must_connect = must_connect;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.config.flush_interval = interval;
        self
    }

    pub fn dial_retry_interval(mut self, interval: Duration) -> Self {
        self.config.dial_retry_interval = interval;
        self
    }

    pub fn max_message_size(mut self, size: u32) -> Self {
        self.config.max_message_size = size;
        self
    }

    /// Parse the address and build the client.
    ///
    /// # Errors
    ///
    /// Returns [`AbciError::InvalidAddress`] if the address does not parse.
    pub fn build(self) -> Result<SocketClient> {
        let address = Address::parse(&self.address)?;
        Ok(SocketClient::with_config(address, self.config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MessageCodec;
    use crate::protocol::FrameBuffer;
    use crate::types::ResponseFlush;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Single-connection fake server answering every request with `respond`.
    async fn fake_server<F>(respond: F) -> String
    where
        F: Fn(&Request) -> Response + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut frames = FrameBuffer::new();
            let mut chunk = vec![0u8; 4096];
            loop {
                let n = match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                for frame in frames.push(&chunk[..n]).unwrap() {
                    let request = MessageCodec::decode_request(&frame).unwrap();
                    let bytes = MessageCodec::encode_response(&respond(&request)).unwrap();
                    if stream.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
            }
        });

        addr
    }

    fn echo_back(request: &Request) -> Response {
        match request {
            Request::Echo(r) => Response::Echo(ResponseEcho {
                message: r.message.clone(),
            }),
            Request::Flush(_) => Response::Flush(ResponseFlush {}),
            Request::DeliverTx(r) => Response::DeliverTx(ResponseDeliverTx {
                data: r.tx.clone(),
                ..Default::default()
            }),
            other => Response::exception(format!("unsupported {}", other.kind())),
        }
    }

    #[test]
    fn test_builder_applies_settings() {
        let client = SocketClient::builder("tcp://127.0.0.1:1")
            .must_connect(false)
            .queue_capacity(8)
            .flush_interval(Duration::from_millis(5))
            .dial_retry_interval(Duration::from_millis(50))
            .max_message_size(1024)
            .build()
            .unwrap();

        let config = &client.inner.config;
        assert!(!config.must_connect);
        assert_eq!(config.queue_capacity, 8);
        assert_eq!(config.flush_interval, Duration::from_millis(5));
        assert_eq!(config.dial_retry_interval, Duration::from_millis(50));
        assert_eq!(config.max_message_size, 1024);
        assert!(matches!(client.state(), ClientState::NotStarted));
    }

    #[test]
    fn test_builder_rejects_bad_address() {
        let err = SocketClient::builder("http://x").build().unwrap_err();
        assert!(matches!(err, AbciError::InvalidAddress(_)));
    }

    #[tokio::test]
    async fn test_echo_roundtrip() {
        let addr = fake_server(echo_back).await;
        let client = SocketClient::new(&addr, true).unwrap();
        client.start().await.unwrap();
        assert!(client.is_running());

        let echo = client.echo("hi").await.unwrap();
        assert_eq!(echo.message, "hi");

        client.stop().await;
        assert!(matches!(client.state(), ClientState::Stopped(None)));
        assert!(client.error().is_none());
    }

    #[tokio::test]
    async fn test_start_twice() {
        let addr = fake_server(echo_back).await;
        let client = SocketClient::new(&addr, true).unwrap();
        client.start().await.unwrap();

        assert!(matches!(client.start().await, Err(AbciError::AlreadyStarted)));
        client.stop().await;
    }

    #[tokio::test]
    async fn test_flush_timer_sends_async_requests() {
        let addr = fake_server(echo_back).await;
        let client = SocketClient::builder(addr)
            .flush_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        client.start().await.unwrap();

        // No explicit flush: the timer pushes the request out.
        let call = client.echo_async("timed").await.unwrap();
        let response = tokio::time::timeout(Duration::from_secs(2), call.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            response,
            Response::Echo(ResponseEcho {
                message: "timed".to_string()
            })
        );

        client.stop().await;
    }

    #[tokio::test]
    async fn test_global_callback_sees_matched_pairs() {
        let addr = fake_server(echo_back).await;
        let client = SocketClient::new(&addr, true).unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = seen.clone();
            client.set_response_callback(move |request, response| {
                assert_eq!(request.kind(), response.kind());
                seen.lock().unwrap().push(request.kind());
            });
        }

        client.start().await.unwrap();
        client.echo("a").await.unwrap();
        client.stop().await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[MessageKind::Echo, MessageKind::Flush]);
    }

    #[tokio::test]
    async fn test_calls_after_stop_fail_fast() {
        let addr = fake_server(echo_back).await;
        let client = SocketClient::new(&addr, true).unwrap();
        client.start().await.unwrap();
        client.stop().await;

        assert!(matches!(client.echo("late").await, Err(AbciError::Stopped)));
        assert!(matches!(client.start().await, Err(AbciError::Stopped)));
    }

    #[tokio::test]
    async fn test_strict_connect_failure_stops_client() {
        // Bind then drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let client = SocketClient::new(&addr, true).unwrap();
        let err = client.start().await.unwrap_err();
        assert!(matches!(err, AbciError::Io(_)));

        let mut closed = client.inner.closed.subscribe();
        closed.wait_for(|c| *c).await.unwrap();
        assert!(matches!(client.state(), ClientState::Stopped(Some(AbciError::Io(_)))));
    }

    #[tokio::test]
    async fn test_stop_ends_lenient_retry() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let client = Arc::new(
            SocketClient::builder(addr)
                .must_connect(false)
                .dial_retry_interval(Duration::from_secs(60))
                .build()
                .unwrap(),
        );

        let starting = {
            let client = client.clone();
            tokio::spawn(async move { client.start().await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(client.state(), ClientState::Connecting));

        client.stop().await;
        let result = tokio::time::timeout(Duration::from_secs(1), starting)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(AbciError::Stopped)));
    }

    #[tokio::test]
    async fn test_exception_response_is_fatal() {
        let addr = fake_server(|_| Response::exception("boom")).await;
        let client = SocketClient::new(&addr, true).unwrap();
        client.start().await.unwrap();

        let err = client.echo("x").await.unwrap_err();
        assert!(matches!(err, AbciError::Exception(ref msg) if msg == "boom"));
        assert!(matches!(client.error(), Some(AbciError::Exception(_))));
    }

    #[tokio::test]
    async fn test_full_queue_blocks_enqueue_until_writer_drains() {
        let addr = fake_server(echo_back).await;
        let client = Arc::new(SocketClient::builder(addr).queue_capacity(1).build().unwrap());

        // Not started yet, so nothing drains the queue.
        let first = client.echo_async("a").await.unwrap();
        let second = {
            let client = client.clone();
            tokio::spawn(async move { client.echo_async("b").await })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!second.is_finished());

        client.start().await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(2), second)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        client.flush().await.unwrap();

        for (call, expected) in [(first, "a"), (second, "b")] {
            let response = call.wait().await.unwrap();
            assert_eq!(
                response,
                Response::Echo(ResponseEcho {
                    message: expected.to_string()
                })
            );
        }

        client.stop().await;
    }

    #[tokio::test]
    async fn test_oversized_request_fails_with_protocol_error() {
        let addr = fake_server(echo_back).await;
        let client = SocketClient::builder(addr)
            .max_message_size(64)
            .build()
            .unwrap();
        client.start().await.unwrap();

        let err = client
            .deliver_tx(RequestDeliverTx::new(vec![0u8; 1024]))
            .await
            .unwrap_err();
        assert!(matches!(err, AbciError::Protocol(ref msg) if msg.contains("exceeds maximum")));
        assert!(matches!(client.error(), Some(AbciError::Protocol(_))));
    }
}
