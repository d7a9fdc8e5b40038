//! In-process transport
//!
//! Every `open()` creates a duplex pipe and hands the server end to the
//! paired [`MemoryListener`]. Used to run a client against an in-process
//! server, and to simulate refused connections.

use crate::stream::{ByteStream, TransportLayer};
use async_trait::async_trait;
use opcua_core::{UaError, UaResult};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::io::DuplexStream;
use tokio::sync::{Mutex, mpsc};

const DEFAULT_PIPE_SIZE: usize = 256 * 1024;

#[derive(Debug)]
struct Shared {
    refusing: AtomicBool,
    attempts: AtomicU32,
}

/// Client side of the in-process transport
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    endpoint_url: String,
    pipe_size: usize,
    connections: mpsc::UnboundedSender<DuplexStream>,
    shared: Arc<Shared>,
}

/// Server side: yields one stream per accepted connection
#[derive(Debug)]
pub struct MemoryListener {
    incoming: Mutex<mpsc::UnboundedReceiver<DuplexStream>>,
}

impl MemoryTransport {
    /// Create a connected transport/listener pair
    pub fn pair(endpoint_url: impl Into<String>) -> (MemoryTransport, MemoryListener) {
        Self::with_pipe_size(endpoint_url, DEFAULT_PIPE_SIZE)
    }

    /// Create a pair whose pipes buffer at most `pipe_size` bytes per direction
    pub fn with_pipe_size(
        endpoint_url: impl Into<String>,
        pipe_size: usize,
    ) -> (MemoryTransport, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = MemoryTransport {
            endpoint_url: endpoint_url.into(),
            pipe_size,
            connections: tx,
            shared: Arc::new(Shared {
                refusing: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
            }),
        };
        let listener = MemoryListener {
            incoming: Mutex::new(rx),
        };
        (transport, listener)
    }

    /// Refuse (or accept again) subsequent connection attempts
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of `open()` calls so far, refused ones included
    pub fn connection_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportLayer for MemoryTransport {
    async fn open(&self) -> UaResult<Box<dyn ByteStream>> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(UaError::Connection(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }
        let (client, server) = tokio::io::duplex(self.pipe_size);
        self.connections.send(server).map_err(|_| {
            UaError::Connection(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "listener closed",
            ))
        })?;
        Ok(Box::new(client))
    }

    fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }
}

impl MemoryListener {
    /// Wait for the next connection; `None` once every transport is dropped
    pub async fn accept(&self) -> Option<DuplexStream> {
        self.incoming.lock().await.recv().await
    }
}
