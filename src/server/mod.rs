//! ABCI socket server.
//!
//! The server accepts any number of connections and serializes every request
//! from all of them through a single [`Application`]. Within a connection,
//! responses go out in request order.
//!
//! ```text
//! conn 1 ─► reader ─┐                     ┌─► queue ─► writer ─► conn 1
//!                   ├─► Mutex<Application> ┤
//! conn 2 ─► reader ─┘                     └─► queue ─► writer ─► conn 2
//! ```
//!
//! # Example
//!
//! ```ignore
//! use abci_socket::{Application, Server};
//!
//! struct App;
//! impl Application for App {}
//!
//! let mut server = Server::new("tcp://127.0.0.1:26658", App)?;
//! server.start().await?;
//! // ...
//! server.stop().await;
//! ```

mod connection;
mod dispatch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::application::Application;
use crate::error::{AbciError, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::transport::{Address, Listener};

use self::connection::ConnectionHandle;

/// Default per-connection response queue capacity.
pub const DEFAULT_RESPONSE_QUEUE_CAPACITY: usize = 1000;

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Responses buffered per connection before the reader waits.
    pub response_queue_capacity: usize,
    /// Largest accepted request payload.
    pub max_message_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            response_queue_capacity: DEFAULT_RESPONSE_QUEUE_CAPACITY,
            max_message_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Server counters.
#[derive(Debug, Default)]
pub struct ServerMetrics {
    accepted: AtomicU64,
    active: AtomicU64,
    requests: AtomicU64,
    exceptions: AtomicU64,
}

impl ServerMetrics {
    /// Connections accepted since start.
    pub fn connections_accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Connections currently open.
    pub fn active_connections(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Requests dispatched, including Echo and Flush.
    pub fn requests_handled(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Exception responses queued.
    pub fn exceptions_sent(&self) -> u64 {
        self.exceptions.load(Ordering::Relaxed)
    }

    fn record_accept(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn record_close(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    fn record_exception(&self) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared between the server handle, the accept loop and connections.
#[derive(Default)]
pub(crate) struct ServerShared {
    connections: Mutex<HashMap<u64, ConnectionHandle>>,
    next_id: AtomicU64,
    metrics: Arc<ServerMetrics>,
}

impl ServerShared {
    fn connections(&self) -> MutexGuard<'_, HashMap<u64, ConnectionHandle>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remove_connection(&self, conn_id: u64) {
        if self.connections().remove(&conn_id).is_some() {
            self.metrics.record_close();
        }
    }

    fn close_all(&self) -> usize {
        let closed: Vec<_> = self.connections().drain().collect();
        for (_, handle) in &closed {
            handle.abort();
            self.metrics.record_close();
        }
        closed.len()
    }
}

/// Multi-connection ABCI server.
pub struct Server<A: Application> {
    address: Address,
    config: ServerConfig,
    app: Arc<AsyncMutex<A>>,
    shared: Arc<ServerShared>,
    accept_task: Option<JoinHandle<()>>,
    local_address: Option<Address>,
}

impl<A: Application> Server<A> {
    /// Create a server for `address` with default settings.
    pub fn new(address: &str, app: A) -> Result<Self> {
        Self::with_config(address, app, ServerConfig::default())
    }

    pub fn with_config(address: &str, app: A, config: ServerConfig) -> Result<Self> {
        Ok(Self {
            address: Address::parse(address)?,
            config,
            app: Arc::new(AsyncMutex::new(app)),
            shared: Arc::new(ServerShared::default()),
            accept_task: None,
            local_address: None,
        })
    }

    /// Bind the listener and start accepting connections.
    ///
    /// # Errors
    ///
    /// - [`AbciError::AlreadyStarted`] if the server is running.
    /// - Bind errors.
    pub async fn start(&mut self) -> Result<()> {
        if self.accept_task.is_some() {
            return Err(AbciError::AlreadyStarted);
        }

        let listener = Listener::bind(&self.address).await?;
        let local = listener.local_address()?;
        info!(address = %local, "ABCI server listening");

        let app = self.app.clone();
        let shared = self.shared.clone();
        let config = self.config.clone();
        self.accept_task = Some(tokio::spawn(accept_loop(listener, app, shared, config)));
        self.local_address = Some(local);
        Ok(())
    }

    /// Close the listener and every live connection.
    pub async fn stop(&mut self) {
        let Some(task) = self.accept_task.take() else {
            return;
        };
        task.abort();
        // Wait for the listener to drop so a Unix socket file is gone on return.
        let _ = task.await;

        let closed = self.shared.close_all();
        info!(address = %self.address, connections = closed, "ABCI server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.accept_task.is_some()
    }

    /// Address actually bound; carries the real port when started on port 0.
    pub fn local_address(&self) -> Option<&Address> {
        self.local_address.as_ref()
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connections().len()
    }

    pub fn metrics(&self) -> Arc<ServerMetrics> {
        Arc::clone(&self.shared.metrics)
    }
}

impl<A: Application> Drop for Server<A> {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
            self.shared.close_all();
        }
    }
}

async fn accept_loop<A: Application>(
    listener: Listener,
    app: Arc<AsyncMutex<A>>,
    shared: Arc<ServerShared>,
    config: ServerConfig,
) {
    loop {
        let (transport, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        let conn_id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        info!(conn_id, peer = %peer, "Accepted ABCI connection");

        let mut connections = shared.connections();
        shared.metrics.record_accept();
        let handle = connection::spawn(conn_id, transport, app.clone(), shared.clone(), &config);
        connections.insert(conn_id, handle);
    }
}
