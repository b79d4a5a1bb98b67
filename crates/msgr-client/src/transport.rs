//! Byte transports.
//!
//! The client never dials sockets directly: every connection goes through a
//! caller-supplied [`TransportFactory`], so tests can hand it loopback
//! streams and embedders can tunnel however they like. [`TcpFactory`] is
//! the default.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use msgr_auth::BoxFuture;

use crate::error::{ClientError, ClientResult};

/// A bidirectional reliable byte stream.
pub trait StreamTransport: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> StreamTransport for T {}

/// A transport ready for framing.
pub type BoxedTransport = Box<dyn StreamTransport>;

/// Opens byte streams to protocol endpoints.
pub trait TransportFactory: Send + Sync {
    /// Dials `host:port` and returns a connected stream.
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<BoxedTransport>>;
}

/// The default factory: plain TCP with a connect timeout.
#[derive(Debug, Clone)]
pub struct TcpFactory {
    connect_timeout: Duration,
}

impl TcpFactory {
    /// Creates a factory with the default 30 second connect timeout.
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Builder: set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

impl Default for TcpFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportFactory for TcpFactory {
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, io::Result<BoxedTransport>> {
        Box::pin(async move {
            debug!(host = %host, port = port, "dialing");
            let stream = tokio::time::timeout(
                self.connect_timeout,
                TcpStream::connect((host, port)),
            )
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {host}:{port} timed out"),
                )
            })??;
            // Frames are small and latency matters more than throughput.
            stream.set_nodelay(true)?;
            Ok(Box::new(stream) as BoxedTransport)
        })
    }
}

/// Splits a `host:port` endpoint string.
pub fn split_endpoint(endpoint: &str) -> ClientResult<(String, u16)> {
    let (host, port) = endpoint.rsplit_once(':').ok_or_else(|| {
        ClientError::InvalidArgument(format!("endpoint {endpoint:?} has no port"))
    })?;
    let port: u16 = port.parse().map_err(|_| {
        ClientError::InvalidArgument(format!("endpoint {endpoint:?} has a bad port"))
    })?;
    if host.is_empty() {
        return Err(ClientError::InvalidArgument(format!(
            "endpoint {endpoint:?} has no host"
        )));
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_valid_endpoint() {
        assert_eq!(
            split_endpoint("messenger.hotmail.com:1863").unwrap(),
            ("messenger.hotmail.com".to_string(), 1863)
        );
        assert_eq!(
            split_endpoint("207.46.108.38:1863").unwrap(),
            ("207.46.108.38".to_string(), 1863)
        );
    }

    #[test]
    fn split_invalid_endpoint() {
        assert!(split_endpoint("no-port").is_err());
        assert!(split_endpoint("host:notaport").is_err());
        assert!(split_endpoint(":1863").is_err());
    }

    #[tokio::test]
    async fn tcp_factory_dials_loopback() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let factory = TcpFactory::new();
        let (transport, _accepted) = tokio::join!(
            factory.connect("127.0.0.1", addr.port()),
            listener.accept()
        );
        assert!(transport.is_ok());
    }

    #[tokio::test]
    async fn tcp_factory_connect_refused() {
        // Bind then drop to find a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let factory = TcpFactory::new().with_connect_timeout(Duration::from_secs(2));
        let result = factory.connect("127.0.0.1", addr.port()).await;
        assert!(result.is_err());
    }
}
