//! Stream and transport traits

use async_trait::async_trait;
use opcua_core::UaResult;
use std::fmt::Debug;
use tokio::io::{AsyncRead, AsyncWrite};

/// Full-duplex byte stream to a server
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + Debug {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + Debug {}

/// Transport layer that can open (and re-open) connections to one endpoint
#[async_trait]
pub trait TransportLayer: Send + Sync + Debug {
    /// Open a new physical connection
    ///
    /// # Errors
    ///
    /// Returns `UaError::Connection` if the connection is refused or
    /// `UaError::Timeout` if it could not be established in time.
    async fn open(&self) -> UaResult<Box<dyn ByteStream>>;

    /// Endpoint URL announced in the Hello message
    fn endpoint_url(&self) -> &str;
}
