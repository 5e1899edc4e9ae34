//! Connection string parsing.
//!
//! Accepted forms:
//! - `unix:///var/run/app.sock` (Unix only)
//! - `tcp://127.0.0.1:26658`
//! - `127.0.0.1:26658` (bare `host:port` is TCP)

use std::fmt;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{AbciError, Result};

const TCP_SCHEME: &str = "tcp://";
const UNIX_SCHEME: &str = "unix://";

/// Where a client dials or a server listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// `host:port`, resolved at connect/bind time.
    Tcp(String),
    /// Filesystem path of a Unix domain socket.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Address {
    /// Parse a connection string.
    ///
    /// # Errors
    ///
    /// Returns [`AbciError::InvalidAddress`] for unknown schemes, empty
    /// targets, or TCP targets without a port.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix(UNIX_SCHEME) {
            return Self::unix(rest, s);
        }

        let target = match s.strip_prefix(TCP_SCHEME) {
            Some(rest) => rest,
            None if s.contains("://") => {
                return Err(AbciError::InvalidAddress(format!("unsupported scheme: {}", s)))
            }
            None => s,
        };

        match target.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Address::Tcp(target.to_string()))
            }
            _ => Err(AbciError::InvalidAddress(format!("expected host:port, got {:?}", s))),
        }
    }

    #[cfg(unix)]
    fn unix(path: &str, original: &str) -> Result<Self> {
        if path.is_empty() {
            return Err(AbciError::InvalidAddress(format!("empty socket path: {}", original)));
        }
        Ok(Address::Unix(PathBuf::from(path)))
    }

    #[cfg(not(unix))]
    fn unix(_path: &str, original: &str) -> Result<Self> {
        Err(AbciError::InvalidAddress(format!(
            "unix sockets are not supported on this platform: {}",
            original
        )))
    }

    /// True for TCP addresses.
    pub fn is_tcp(&self) -> bool {
        matches!(self, Address::Tcp(_))
    }
}

impl FromStr for Address {
    type Err = AbciError;

    fn from_str(s: &str) -> Result<Self> {
        Address::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Tcp(addr) => write!(f, "{}{}", TCP_SCHEME, addr),
            #[cfg(unix)]
            Address::Unix(path) => write!(f, "{}{}", UNIX_SCHEME, path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_with_scheme() {
        let addr = Address::parse("tcp://127.0.0.1:26658").unwrap();
        assert_eq!(addr, Address::Tcp("127.0.0.1:26658".to_string()));
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:26658");
    }

    #[test]
    fn test_bare_host_port_is_tcp() {
        let addr: Address = "localhost:26658".parse().unwrap();
        assert!(addr.is_tcp());
        assert_eq!(addr.to_string(), "tcp://localhost:26658");
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_path() {
        let addr = Address::parse("unix:///tmp/app.sock").unwrap();
        assert_eq!(addr, Address::Unix(PathBuf::from("/tmp/app.sock")));
        assert_eq!(addr.to_string(), "unix:///tmp/app.sock");
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let err = Address::parse("grpc://127.0.0.1:26658").unwrap_err();
        assert!(matches!(err, AbciError::InvalidAddress(_)));
    }

    #[test]
    fn test_rejects_missing_port() {
        assert!(Address::parse("tcp://127.0.0.1").is_err());
        assert!(Address::parse("127.0.0.1:notaport").is_err());
        assert!(Address::parse(":26658").is_err());
        assert!(Address::parse("").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_empty_unix_path() {
        assert!(Address::parse("unix://").is_err());
    }
}
