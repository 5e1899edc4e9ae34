//! Server-side listener over TCP or a Unix domain socket.

#[cfg(unix)]
use std::path::{Path, PathBuf};

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;

use super::{Address, Transport};
use crate::error::Result;

/// Bound listener. Unix listeners own their socket file.
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix { listener: UnixListener, path: PathBuf },
}

impl Listener {
    /// Bind to the given address.
    ///
    /// For Unix sockets a stale file at the path is removed first.
    pub async fn bind(address: &Address) -> Result<Self> {
        match address {
            Address::Tcp(addr) => Ok(Listener::Tcp(TcpListener::bind(addr.as_str()).await?)),
            #[cfg(unix)]
            Address::Unix(path) => {
                if Path::new(path).exists() {
                    std::fs::remove_file(path)?;
                }
                let listener = UnixListener::bind(path)?;
                Ok(Listener::Unix {
                    listener,
                    path: path.clone(),
                })
            }
        }
    }

    /// Accept the next connection.
    ///
    /// Returns the transport and a printable peer description for logs.
    pub async fn accept(&self) -> Result<(Transport, String)> {
        match self {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                Ok((Transport::from_tcp(stream)?, peer.to_string()))
            }
            #[cfg(unix)]
            Listener::Unix { listener, path } => {
                let (stream, _peer) = listener.accept().await?;
                Ok((Transport::Unix(stream), path.display().to_string()))
            }
        }
    }

    /// Address actually bound. For TCP this carries the real port when
    /// binding to port 0.
    pub fn local_address(&self) -> Result<Address> {
        match self {
            Listener::Tcp(listener) => Ok(Address::Tcp(listener.local_addr()?.to_string())),
            #[cfg(unix)]
            Listener::Unix { path, .. } => Ok(Address::Unix(path.clone())),
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let Listener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}
