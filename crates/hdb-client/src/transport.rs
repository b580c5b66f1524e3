//! Byte stream setup: dialing, TCP keep-alive and the optional TLS layer.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};

/// A bidirectional byte stream a session can run on.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Type-erased transport: plain TCP, TLS, or whatever a custom dialer returns.
pub type Transport = Box<dyn Io>;

/// Opens the byte stream to a server.
#[async_trait]
pub trait Dialer: Send + Sync + fmt::Debug {
    /// Connect to `addr` (`host:port`).
    async fn dial(
        &self,
        addr: &str,
        timeout: Option<Duration>,
        keepalive: Option<Duration>,
    ) -> io::Result<Transport>;
}

/// Default dialer over `tokio::net`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl TcpDialer {
    async fn connect_addr(addr: SocketAddr, keepalive: bool) -> io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_keepalive(keepalive)?;
        socket.set_nodelay(true)?;
        socket.connect(addr).await
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(
        &self,
        addr: &str,
        timeout: Option<Duration>,
        keepalive: Option<Duration>,
    ) -> io::Result<Transport> {
        let connect = async {
            let mut last_err = None;
            for resolved in tokio::net::lookup_host(addr).await? {
                match Self::connect_addr(resolved, keepalive.is_some()).await {
                    Ok(stream) => return Ok(stream),
                    Err(e) => {
                        tracing::debug!(addr = %resolved, error = %e, "connect attempt failed");
                        last_err = Some(e);
                    }
                }
            }
            Err(last_err.unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {addr}"))
            }))
        };

        let stream = match timeout.filter(|t| !t.is_zero()) {
            Some(limit) => tokio::time::timeout(limit, connect).await.map_err(|_| {
                io::Error::new(io::ErrorKind::TimedOut, format!("dial {addr} timed out"))
            })??,
            None => connect.await?,
        };
        tracing::debug!(addr, "TCP connection established");
        Ok(Box::new(stream))
    }
}

/// Host part of `host:port`, without IPv6 brackets.
pub(crate) fn host_of(addr: &str) -> &str {
    let host = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_host_of() {
        assert_eq!(host_of("hana1:30015"), "hana1");
        assert_eq!(host_of("[::1]:30015"), "::1");
        assert_eq!(host_of("hana1"), "hana1");
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let result = TcpDialer
            .dial(&addr.to_string(), Some(Duration::from_secs(5)), None)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dial_accepts() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|_| ()) });
        TcpDialer
            .dial(&addr.to_string(), None, Some(Duration::from_secs(15)))
            .await
            .unwrap();
        accept.await.unwrap().unwrap();
    }
}
