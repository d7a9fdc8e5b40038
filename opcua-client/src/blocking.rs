//! Synchronous adapter
//!
//! [`BlockingClient`] owns a multi-thread runtime and blocks the calling
//! thread on client futures. It has to be used outside of any tokio
//! runtime, since blocking inside one would stall its workers.

use crate::address_space::{TypedProperty, ValueCodec};
use crate::client::Client;
use crate::config::ClientConfig;
use crate::reconnect::ConnectionState;
use opcua_core::{UaError, UaResult};
use opcua_transport::TransportLayer;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};

const WORKER_THREADS: usize = 2;

pub struct BlockingClient {
    client: Client,
    // Dropped last so the client's tasks stop with it
    runtime: Runtime,
}

impl std::fmt::Debug for BlockingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingClient").field("client", &self.client).finish()
    }
}

fn runtime() -> UaResult<Runtime> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(UaError::InvalidState(
            "BlockingClient cannot be used inside an async runtime".to_string(),
        ));
    }
    Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .thread_name("opcua-client")
        .enable_all()
        .build()
        .map_err(UaError::Connection)
}

impl BlockingClient {
    /// Connect over TCP, blocking until the session is activated
    pub fn connect(config: ClientConfig) -> UaResult<Self> {
        let runtime = runtime()?;
        let client = runtime.block_on(Client::connect(config))?;
        Ok(Self { client, runtime })
    }

    pub fn connect_with(config: ClientConfig, transport: Arc<dyn TransportLayer>) -> UaResult<Self> {
        let runtime = runtime()?;
        let client = runtime.block_on(Client::connect_with(config, transport, None))?;
        Ok(Self { client, runtime })
    }

    /// Run any client future to completion on the owned runtime
    ///
    /// ```ignore
    /// let ids = blocking.block_on(|client| async move {
    ///     client.create_subscription(SubscriptionSettings::default(), None).await
    /// })?;
    /// ```
    pub fn block_on<F, Fut, T>(&self, operation: F) -> T
    where
        F: FnOnce(Client) -> Fut,
        Fut: Future<Output = T>,
    {
        self.runtime.block_on(operation(self.client.clone()))
    }

    pub fn get<C: ValueCodec>(&self, property: &TypedProperty<C>) -> UaResult<C::Value> {
        self.runtime.block_on(property.get(&self.client))
    }

    pub fn set<C: ValueCodec>(&self, property: &TypedProperty<C>, value: &C::Value) -> UaResult<()> {
        self.runtime.block_on(property.set(&self.client, value))
    }

    pub fn state(&self) -> ConnectionState {
        self.client.state()
    }

    /// Async client for use from tasks spawned on [`BlockingClient::handle`]
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn handle(&self) -> &tokio::runtime::Handle {
        self.runtime.handle()
    }

    pub fn disconnect(self) -> UaResult<()> {
        let result = self.runtime.block_on(self.client.disconnect());
        drop(self.client);
        self.runtime.shutdown_background();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refuses_nested_runtime() {
        let result = BlockingClient::connect(ClientConfig::default());
        assert!(matches!(result, Err(UaError::InvalidState(_))));
    }
}
