//! Counter application - serial transaction counter over ABCI.
//!
//! This demo shows:
//! - Implementing [`Application`] for only the methods you need
//! - Serving it with [`Server`] on TCP or a Unix socket
//! - Driving it with [`SocketClient`] in the same process
//!
//! Transactions are big-endian integers that must equal the current count,
//! so replayed or out-of-order transactions are rejected.
//!
//! ```text
//! RUST_LOG=debug cargo run --example counter -- tcp://127.0.0.1:26658
//! ```
//!
//! The server keeps running after the demo client finishes; stop it with
//! Ctrl-C.

use abci_socket::{
    Application, RequestCheckTx, RequestCommit, RequestDeliverTx, RequestInfo, RequestQuery,
    ResponseCheckTx, ResponseCommit, ResponseDeliverTx, ResponseInfo, ResponseQuery, Server,
    SocketClient,
};
use bytes::Bytes;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Code for a transaction whose nonce does not match the count.
const CODE_BAD_NONCE: u32 = 2;

#[derive(Default)]
struct Counter {
    tx_count: u64,
    height: i64,
}

impl Counter {
    fn parse_tx(tx: &[u8]) -> Option<u64> {
        let bytes: [u8; 8] = tx.try_into().ok()?;
        Some(u64::from_be_bytes(bytes))
    }

    fn check_nonce(&self, tx: &[u8]) -> Result<(), String> {
        match Self::parse_tx(tx) {
            Some(nonce) if nonce == self.tx_count => Ok(()),
            Some(nonce) => Err(format!("expected nonce {}, got {}", self.tx_count, nonce)),
            None => Err(format!("tx must be 8 bytes, got {}", tx.len())),
        }
    }
}

impl Application for Counter {
    fn info(&mut self, _request: RequestInfo) -> ResponseInfo {
        ResponseInfo {
            data: format!("{{\"tx_count\":{}}}", self.tx_count),
            version: env!("CARGO_PKG_VERSION").to_string(),
            last_block_height: self.height,
            ..Default::default()
        }
    }

    fn check_tx(&mut self, request: RequestCheckTx) -> ResponseCheckTx {
        match self.check_nonce(&request.tx) {
            Ok(()) => ResponseCheckTx::default(),
            Err(log) => ResponseCheckTx {
                code: CODE_BAD_NONCE,
                log,
                ..Default::default()
            },
        }
    }

    fn deliver_tx(&mut self, request: RequestDeliverTx) -> ResponseDeliverTx {
        if let Err(log) = self.check_nonce(&request.tx) {
            return ResponseDeliverTx {
                code: CODE_BAD_NONCE,
                log,
                ..Default::default()
            };
        }
        self.tx_count += 1;
        ResponseDeliverTx::default()
    }

    fn commit(&mut self, _request: RequestCommit) -> ResponseCommit {
        self.height += 1;
        ResponseCommit {
            data: Bytes::from(self.tx_count.to_be_bytes().to_vec()),
            ..Default::default()
        }
    }

    fn query(&mut self, request: RequestQuery) -> ResponseQuery {
        match request.path.as_str() {
            "tx" => ResponseQuery {
                value: Bytes::from(self.tx_count.to_string()),
                height: self.height,
                ..Default::default()
            },
            other => ResponseQuery {
                code: 1,
                log: format!("unknown path {:?}", other),
                ..Default::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let address = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "tcp://127.0.0.1:26658".to_string());

    let mut server = Server::new(&address, Counter::default())?;
    server.start().await?;
    let bound = server
        .local_address()
        .map(ToString::to_string)
        .unwrap_or_else(|| address.clone());

    let client = SocketClient::new(&bound, true)?;
    client.start().await?;

    for nonce in 0u64..5 {
        let tx = nonce.to_be_bytes().to_vec();
        client.deliver_tx(RequestDeliverTx::new(tx)).await?;
    }

    // Replay: delivered again, rejected by the application.
    let replay = client
        .deliver_tx(RequestDeliverTx::new(0u64.to_be_bytes().to_vec()))
        .await?;
    tracing::info!(code = replay.code, log = %replay.log, "Replayed transaction");

    let commit = client.commit().await?;
    let query = client
        .query(RequestQuery {
            path: "tx".to_string(),
            ..Default::default()
        })
        .await?;
    tracing::info!(
        app_hash = ?commit.data,
        tx_count = %String::from_utf8_lossy(&query.value),
        "Committed block"
    );

    client.stop().await;

    tracing::info!(address = %bound, "Serving until Ctrl-C");
    tokio::signal::ctrl_c().await?;
    server.stop().await;
    Ok(())
}
