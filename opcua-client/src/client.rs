//! Connected client
//!
//! [`Client`] owns the secure channel, the session and the subscription
//! engine, and supervises them: when the channel or the session is lost it
//! suspends publishing and runs the [`ReconnectController`], which opens a
//! new channel, transfers (or recreates) the session and moves the
//! subscriptions over before publishing resumes.

use crate::address_space::{NodeAccess, NodeCache, OperationLimits, invoke_within};
use crate::config::ClientConfig;
use crate::invoker::ServiceInvoker;
use crate::reconnect::{ConnectionState, ReconnectController, ReconnectTarget};
use crate::session::{Session, SessionSettings};
use crate::subscription::{
    CreatedItem, ItemModification, MonitoredItemRequest, RevisedParameters, SubscriptionListener,
    SubscriptionManager, SubscriptionSettings,
};
use async_trait::async_trait;
use opcua_channel::SecureChannel;
use opcua_core::{StatusCode, UaError, UaResult};
use opcua_security::AsymmetricSecurity;
use opcua_service::{ServiceRequest, ServiceResponse};
use opcua_transport::{TcpTransport, TransportLayer};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

const EVENT_CAPACITY: usize = 64;

/// Connection events published by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    ConnectionLost { reason: String },
    Reconnected { attempts: u32, session_recreated: bool },
    ReconnectFailed { attempts: u32 },
    Disconnected,
}

#[derive(Clone)]
struct Link {
    channel: Arc<SecureChannel>,
    session: Arc<Session>,
}

/// The current session, or the reason there is none
///
/// Handed to the subscription engine as its invoker so publishing always
/// goes to whichever session is current.
struct SessionSlot {
    link: RwLock<Option<Link>>,
    state: watch::Receiver<ConnectionState>,
}

impl SessionSlot {
    fn link(&self) -> Option<Link> {
        self.link.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn install(&self, link: Link) {
        *self.link.write().unwrap_or_else(PoisonError::into_inner) = Some(link);
    }

    fn take(&self) -> Option<Link> {
        self.link.write().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Only a connected client hands out its session
    fn session(&self) -> UaResult<Arc<Session>> {
        if let Some(error) = self.state.borrow().call_error() {
            return Err(error);
        }
        self.link().map(|link| link.session).ok_or(UaError::Reconnecting)
    }
}

#[async_trait]
impl ServiceInvoker for SessionSlot {
    async fn invoke(&self, request: ServiceRequest, timeout: Duration) -> UaResult<ServiceResponse> {
        let session = self.session()?;
        invoke_within(session.as_ref(), session.operation_limits(), request, timeout).await
    }
}

struct ClientInner {
    config: ClientConfig,
    transport: Arc<dyn TransportLayer>,
    asymmetric: Option<Arc<dyn AsymmetricSecurity>>,
    slot: Arc<SessionSlot>,
    /// Held while the channel and session are replaced or torn down
    lifecycle: tokio::sync::Mutex<()>,
    controller: ReconnectController,
    subscriptions: SubscriptionManager,
    cache: NodeCache,
    events: broadcast::Sender<ClientEvent>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(handle) = self.supervisor.get_mut().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
    }
}

impl ClientInner {
    async fn open_channel(&self) -> UaResult<Arc<SecureChannel>> {
        let config = self.config.channel.channel_config(self.asymmetric.clone())?;
        let channel = SecureChannel::open(self.transport.as_ref(), config).await?;
        Ok(Arc::new(channel))
    }

    async fn establish_session(&self, channel: &Arc<dyn ServiceInvoker>) -> UaResult<Arc<Session>> {
        let session = Session::create(channel, &SessionSettings::from(&self.config)).await?;
        session.activate(&self.config.identity).await?;
        session.set_operation_limits(OperationLimits::fetch(&session).await);
        Ok(Arc::new(session))
    }

    fn emit(&self, event: ClientEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    /// Replace a lost channel and session
    async fn recover(&self, reason: String) -> UaResult<u32> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.controller.state() == ConnectionState::Closed {
            return Err(UaError::InvalidState("client disconnected".to_string()));
        }
        log::warn!("Connection lost: {}", reason);
        self.emit(ClientEvent::ConnectionLost { reason });
        self.controller.set_state(ConnectionState::Reconnecting { attempt: 0 });

        let old = self.slot.take();
        self.subscriptions.suspend();
        self.cache.invalidate();
        let session = match old {
            Some(link) => {
                link.channel.close().await;
                Some(link.session)
            }
            None => None,
        };

        let recovery = Recovery {
            inner: self,
            session: Mutex::new(session),
            transfer_pending: AtomicBool::new(false),
            recreated: AtomicBool::new(false),
        };
        match self.controller.reconnect(&recovery).await {
            Ok(attempts) => {
                self.subscriptions.resume();
                self.cache.invalidate();
                self.emit(ClientEvent::Reconnected {
                    attempts,
                    session_recreated: recovery.recreated.load(Ordering::SeqCst),
                });
                Ok(attempts)
            }
            Err(e) => {
                let attempts = match self.controller.state() {
                    ConnectionState::Failed { attempts } => attempts,
                    _ => 0,
                };
                self.emit(ClientEvent::ReconnectFailed { attempts });
                Err(e)
            }
        }
    }
}

/// One reconnection attempt against the client
struct Recovery<'a> {
    inner: &'a ClientInner,
    /// Session to transfer; cleared once the server rejected it
    session: Mutex<Option<Arc<Session>>>,
    /// A new session exists but the subscriptions are not on it yet
    transfer_pending: AtomicBool,
    recreated: AtomicBool,
}

impl Recovery<'_> {
    fn session(&self) -> Option<Arc<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_session(&self, session: Option<Arc<Session>>) {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = session;
    }

    async fn session_on(&self, channel: &Arc<dyn ServiceInvoker>) -> UaResult<Arc<Session>> {
        if let Some(session) = self.session() {
            match session.transfer(channel).await {
                Ok(()) => return Ok(session),
                Err(UaError::TransferRejected(status)) => {
                    log::warn!("Session {} cannot be transferred ({}), creating a new one", session.session_id(), status);
                    self.set_session(None);
                }
                Err(e) => return Err(e),
            }
        }
        let session = self.inner.establish_session(channel).await?;
        self.set_session(Some(Arc::clone(&session)));
        self.transfer_pending.store(true, Ordering::SeqCst);
        self.recreated.store(true, Ordering::SeqCst);
        Ok(session)
    }
}

#[async_trait]
impl ReconnectTarget for Recovery<'_> {
    async fn attempt(&self, attempt: u32) -> UaResult<()> {
        let channel = self.inner.open_channel().await?;
        let invoker: Arc<dyn ServiceInvoker> = channel.clone();
        let session = match self.session_on(&invoker).await {
            Ok(session) => session,
            Err(e) => {
                channel.close().await;
                return Err(e);
            }
        };
        // Published only once the subscriptions are on the session
        if self.transfer_pending.load(Ordering::SeqCst) {
            if let Err(e) = self.inner.subscriptions.transfer_subscriptions(session.as_ref()).await {
                log::warn!("Subscriptions not restored on attempt {}: {}", attempt, e);
                channel.close().await;
                return Err(e);
            }
            self.transfer_pending.store(false, Ordering::SeqCst);
        }
        self.inner.slot.install(Link { channel, session });
        Ok(())
    }
}

/// Watch the current channel and session, recovering when either is lost
async fn supervise(inner: Weak<ClientInner>) {
    loop {
        let (link, interval, failures_allowed) = {
            let Some(inner) = inner.upgrade() else { return };
            let Some(link) = inner.slot.link() else { return };
            (link, inner.config.keep_alive_interval, inner.config.keep_alive_failures_allowed)
        };
        let reason = tokio::select! {
            state = link.channel.closed() => format!("secure channel {}", state),
            reason = link.session.lost() => reason,
            () = link.session.run_keep_alive(interval, failures_allowed) => {
                if link.session.is_lost() {
                    link.session.lost().await
                } else {
                    "session closed".to_string()
                }
            }
        };
        drop(link);

        let Some(inner) = inner.upgrade() else { return };
        if inner.controller.state() == ConnectionState::Closed {
            return;
        }
        if inner.recover(reason).await.is_err() {
            return;
        }
    }
}

/// An OPC-UA client connection
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint_url", &self.inner.config.endpoint_url)
            .field("state", &self.state())
            .finish()
    }
}

impl Client {
    /// Connect over TCP to `config.endpoint_url`
    pub async fn connect(config: ClientConfig) -> UaResult<Client> {
        let transport = TcpTransport::from_url(&config.endpoint_url)?;
        Self::connect_with(config, Arc::new(transport), None).await
    }

    /// Connect over `transport`
    ///
    /// `asymmetric` protects OpenSecureChannel for secured policies.
    ///
    /// # Errors
    ///
    /// The first failure of the initial connection is returned as is; the
    /// reconnection budget only applies once connected.
    pub async fn connect_with(
        config: ClientConfig,
        transport: Arc<dyn TransportLayer>,
        asymmetric: Option<Arc<dyn AsymmetricSecurity>>,
    ) -> UaResult<Client> {
        config.validate()?;
        let controller = ReconnectController::new(config.reconnect.clone());
        let slot = Arc::new(SessionSlot {
            link: RwLock::new(None),
            state: controller.state_changes(),
        });
        let subscriptions =
            SubscriptionManager::new(slot.clone(), config.publish.clone(), config.request_timeout);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(ClientInner {
            config,
            transport,
            asymmetric,
            slot,
            lifecycle: tokio::sync::Mutex::new(()),
            controller,
            subscriptions,
            cache: NodeCache::new(),
            events,
            supervisor: Mutex::new(None),
        });

        log::info!("Connecting to {}", inner.config.endpoint_url);
        let channel = inner.open_channel().await?;
        let invoker: Arc<dyn ServiceInvoker> = channel.clone();
        let session = match inner.establish_session(&invoker).await {
            Ok(session) => session,
            Err(e) => {
                channel.close().await;
                return Err(e);
            }
        };
        inner.slot.install(Link { channel, session });
        inner.controller.set_state(ConnectionState::Connected);

        let handle = tokio::spawn(supervise(Arc::downgrade(&inner)));
        *inner.supervisor.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(Client { inner })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.controller.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.controller.state_changes()
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Current session
    ///
    /// # Errors
    ///
    /// `UaError::Reconnecting` while reconnecting,
    /// `UaError::ReconnectFailed` once reconnection gave up
    pub fn session(&self) -> UaResult<Arc<Session>> {
        self.inner.slot.session()
    }

    pub fn channel(&self) -> Option<Arc<SecureChannel>> {
        self.inner.slot.link().map(|link| link.channel)
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.inner.subscriptions
    }

    pub async fn create_subscription(
        &self,
        settings: SubscriptionSettings,
        listener: Option<Arc<dyn SubscriptionListener>>,
    ) -> UaResult<u32> {
        self.inner.subscriptions.create_subscription(settings, listener).await
    }

    pub async fn modify_subscription(&self, id: u32, settings: SubscriptionSettings) -> UaResult<RevisedParameters> {
        self.inner.subscriptions.modify_subscription(id, settings).await
    }

    pub async fn set_publishing_mode(&self, id: u32, enabled: bool) -> UaResult<()> {
        self.inner.subscriptions.set_publishing_mode(id, enabled).await
    }

    pub async fn delete_subscription(&self, id: u32) -> UaResult<()> {
        self.inner.subscriptions.delete_subscription(id).await
    }

    pub async fn create_monitored_items(
        &self,
        subscription_id: u32,
        items: Vec<MonitoredItemRequest>,
    ) -> UaResult<Vec<CreatedItem>> {
        self.inner.subscriptions.create_monitored_items(subscription_id, items).await
    }

    pub async fn modify_monitored_items(
        &self,
        subscription_id: u32,
        modifications: Vec<ItemModification>,
    ) -> UaResult<Vec<StatusCode>> {
        self.inner
            .subscriptions
            .modify_monitored_items(subscription_id, modifications)
            .await
    }

    pub async fn delete_monitored_items(&self, subscription_id: u32, client_handles: &[u32]) -> UaResult<Vec<StatusCode>> {
        self.inner
            .subscriptions
            .delete_monitored_items(subscription_id, client_handles)
            .await
    }

    /// Close the session and the channel
    ///
    /// Subscriptions are deleted with the session. Calls made afterwards
    /// fail with `UaError::InvalidState`.
    pub async fn disconnect(&self) -> UaResult<()> {
        // Stops a reconnection in progress too
        if let Some(handle) = self.inner.supervisor.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.state() == ConnectionState::Closed {
            return Ok(());
        }
        self.inner.controller.set_state(ConnectionState::Closed);
        self.inner.subscriptions.shutdown();

        let result = match self.inner.slot.take() {
            Some(link) => {
                let closed = link.session.close(true).await;
                if let Err(e) = &closed {
                    log::warn!("CloseSession failed: {}", e);
                }
                link.channel.close().await;
                closed
            }
            None => Ok(()),
        };
        self.inner.cache.invalidate();
        log::info!("Disconnected from {}", self.inner.config.endpoint_url);
        self.inner.emit(ClientEvent::Disconnected);
        result
    }
}

#[async_trait]
impl ServiceInvoker for Client {
    async fn invoke(&self, request: ServiceRequest, timeout: Duration) -> UaResult<ServiceResponse> {
        self.inner.slot.invoke(request, timeout).await
    }
}

impl NodeAccess for Client {
    fn node_cache(&self) -> &NodeCache {
        &self.inner.cache
    }
}
