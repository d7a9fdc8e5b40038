//! TCP transport implementation

use crate::stream::{ByteStream, TransportLayer};
use crate::url::EndpointUrl;
use async_trait::async_trait;
use opcua_core::{UaError, UaResult};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

/// Wrapper for TcpStream that implements Debug with the peer address
struct DebugTcpStream(TcpStream);

impl fmt::Debug for DebugTcpStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpStream")
            .field("peer", &self.0.peer_addr().ok())
            .finish()
    }
}

impl Deref for DebugTcpStream {
    type Target = TcpStream;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for DebugTcpStream {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl AsyncRead for DebugTcpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for DebugTcpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// TCP transport layer settings
#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub endpoint_url: String,
    /// Connection establishment timeout; `None` waits indefinitely
    pub connect_timeout: Option<Duration>,
    pub nodelay: bool,
}

impl TcpSettings {
    /// Create new TCP settings
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            connect_timeout: Some(Duration::from_secs(5)),
            nodelay: true,
        }
    }

    /// Create TCP settings with a connect timeout
    pub fn with_timeout(endpoint_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            connect_timeout: Some(timeout),
            ..Self::new(endpoint_url)
        }
    }
}

/// TCP transport to an `opc.tcp://` endpoint
#[derive(Debug)]
pub struct TcpTransport {
    settings: TcpSettings,
    url: EndpointUrl,
}

impl TcpTransport {
    /// Create a new TCP transport
    ///
    /// # Errors
    ///
    /// Returns `UaError::Config` if the endpoint URL is not a valid
    /// `opc.tcp://` URL.
    pub fn new(settings: TcpSettings) -> UaResult<Self> {
        let url = settings.endpoint_url.parse()?;
        Ok(Self { settings, url })
    }

    /// Create TCP transport from an endpoint URL with default settings
    pub fn from_url(endpoint_url: &str) -> UaResult<Self> {
        Self::new(TcpSettings::new(endpoint_url))
    }

    pub fn url(&self) -> &EndpointUrl {
        &self.url
    }
}

#[async_trait]
impl TransportLayer for TcpTransport {
    async fn open(&self) -> UaResult<Box<dyn ByteStream>> {
        let address = self.url.socket_address();
        log::debug!("Connecting to {}", address);

        let stream = if let Some(timeout) = self.settings.connect_timeout {
            tokio::time::timeout(timeout, TcpStream::connect(&address))
                .await
                .map_err(|_| UaError::Timeout)??
        } else {
            TcpStream::connect(&address).await?
        };
        stream.set_nodelay(self.settings.nodelay)?;

        log::debug!("Connected to {}", address);
        Ok(Box::new(DebugTcpStream(stream)))
    }

    fn endpoint_url(&self) -> &str {
        &self.settings.endpoint_url
    }
}
