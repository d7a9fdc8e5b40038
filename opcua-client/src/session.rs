//! Session manager
//!
//! A [`Session`] is created on a secure channel, activated with a user
//! identity and then carries every service call. It refers to its channel
//! weakly: the client owns the channel, and `transfer` moves the session to
//! a new one after reconnection.
//!
//! ```text
//!   create() ──> Created ──activate()──> Activated ──close()──> Closed
//!                                         │    ^
//!                                         └────┘ transfer() to a new channel
//! ```

use crate::address_space::OperationLimits;
use crate::config::{ClientConfig, IdentityConfig};
use crate::invoker::ServiceInvoker;
use async_trait::async_trait;
use opcua_core::{
    ByteString, DataValue, ExtensionObject, LocalizedText, NodeId, StatusCode, UaError, UaResult,
    ids,
};
use opcua_security::generate_nonce;
use opcua_service::{
    ActivateSessionRequest, ActivateSessionResponse, AnonymousIdentityToken,
    ApplicationDescription, ApplicationType, CloseSessionRequest, CloseSessionResponse,
    CreateSessionRequest, CreateSessionResponse, EndpointDescription, ReadRequest, ReadResponse,
    ReadValueId, RequestHeader, ServiceRequest, ServiceResponse, UserNameIdentityToken,
    UserTokenType,
};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::watch;

const CLIENT_NONCE_LENGTH: usize = 32;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Activated,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Created => "Created",
            SessionState::Activated => "Activated",
            SessionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Parameters a session is created with
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub endpoint_url: String,
    pub application_name: String,
    pub application_uri: String,
    pub product_uri: String,
    pub session_name: String,
    pub session_timeout: Duration,
    pub request_timeout: Duration,
}

impl From<&ClientConfig> for SessionSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            endpoint_url: config.endpoint_url.clone(),
            application_name: config.application_name.clone(),
            application_uri: config.application_uri.clone(),
            product_uri: config.product_uri.clone(),
            session_name: config.session_name.clone(),
            session_timeout: config.session_timeout,
            request_timeout: config.request_timeout,
        }
    }
}

fn millis(duration: Duration) -> u32 {
    duration.as_millis().min(u32::MAX as u128) as u32
}

/// Statuses meaning the server no longer knows the session
fn is_transfer_rejection(status: StatusCode) -> bool {
    status.is_session_error()
        || matches!(
            status,
            StatusCode::BAD_SECURITY_CHECKS_FAILED
                | StatusCode::BAD_IDENTITY_TOKEN_INVALID
                | StatusCode::BAD_IDENTITY_TOKEN_REJECTED
                | StatusCode::BAD_USER_ACCESS_DENIED
        )
}

/// An OPC-UA session
pub struct Session {
    session_id: NodeId,
    authentication_token: NodeId,
    revised_timeout: Duration,
    request_timeout: Duration,
    endpoints: Vec<EndpointDescription>,
    server_nonce: Mutex<ByteString>,
    identity: Mutex<Option<IdentityConfig>>,
    channel: RwLock<Weak<dyn ServiceInvoker>>,
    state: watch::Sender<SessionState>,
    lost: watch::Sender<Option<String>>,
    next_handle: AtomicU32,
    operation_limits: Mutex<OperationLimits>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("state", &self.state())
            .field("revised_timeout", &self.revised_timeout)
            .finish()
    }
}

impl Session {
    /// Create a session on `channel`
    ///
    /// The session starts in `Created`; service calls fail with
    /// `UaError::NotActivated` until [`Session::activate`] succeeds.
    pub async fn create(
        channel: &Arc<dyn ServiceInvoker>,
        settings: &SessionSettings,
    ) -> UaResult<Session> {
        let request = CreateSessionRequest {
            request_header: RequestHeader::new(NodeId::NULL, 1, millis(settings.request_timeout)),
            client_description: ApplicationDescription {
                application_uri: settings.application_uri.clone(),
                product_uri: settings.product_uri.clone(),
                application_name: LocalizedText::new("", settings.application_name.as_str()),
                application_type: ApplicationType::Client,
                ..Default::default()
            },
            server_uri: String::new(),
            endpoint_url: settings.endpoint_url.clone(),
            session_name: settings.session_name.clone(),
            client_nonce: ByteString::from(generate_nonce(CLIENT_NONCE_LENGTH)?),
            client_certificate: ByteString::null(),
            requested_session_timeout: settings.session_timeout.as_millis() as f64,
            max_response_message_size: 0,
        };
        let response: CreateSessionResponse = channel
            .invoke(request.into(), settings.request_timeout)
            .await?
            .into_typed()?;

        let revised_timeout = Duration::from_millis(response.revised_session_timeout.max(0.0) as u64);
        log::info!(
            "Session {} created, timeout {:?}",
            response.session_id,
            revised_timeout
        );
        let (state, _) = watch::channel(SessionState::Created);
        let (lost, _) = watch::channel(None);
        Ok(Session {
            session_id: response.session_id,
            authentication_token: response.authentication_token,
            revised_timeout,
            request_timeout: settings.request_timeout,
            endpoints: response.server_endpoints,
            server_nonce: Mutex::new(response.server_nonce),
            identity: Mutex::new(None),
            channel: RwLock::new(Arc::downgrade(channel)),
            state,
            lost,
            next_handle: AtomicU32::new(2),
            operation_limits: Mutex::new(OperationLimits::default()),
        })
    }

    /// Activate the session with a user identity
    ///
    /// # Errors
    ///
    /// * `UaError::Service` - the server rejected the identity
    /// * `UaError::SessionLost` - the session was closed
    pub async fn activate(&self, identity: &IdentityConfig) -> UaResult<()> {
        if self.state() == SessionState::Closed {
            return Err(UaError::SessionLost("session closed".to_string()));
        }
        let channel = self.channel()?;
        self.activate_on(channel.as_ref(), identity).await?;
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = Some(identity.clone());
        self.state.send_replace(SessionState::Activated);
        log::info!("Session {} activated", self.session_id);
        Ok(())
    }

    /// Re-activate the session on a new channel
    ///
    /// # Errors
    ///
    /// `UaError::TransferRejected` when the server no longer accepts the
    /// session, so that a new one has to be created. Transport failures and
    /// timeouts are returned unchanged.
    pub async fn transfer(&self, channel: &Arc<dyn ServiceInvoker>) -> UaResult<()> {
        if self.state() != SessionState::Activated {
            return Err(UaError::TransferRejected(StatusCode::BAD_SESSION_NOT_ACTIVATED));
        }
        let identity = self
            .identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_default();
        match self.activate_on(channel.as_ref(), &identity).await {
            Ok(()) => {}
            Err(UaError::Service(status)) if is_transfer_rejection(status) => {
                log::warn!("Server rejected transfer of session {}: {}", self.session_id, status);
                return Err(UaError::TransferRejected(status));
            }
            Err(e) => return Err(e),
        }
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(channel);
        self.lost.send_replace(None);
        log::info!("Session {} transferred to new channel", self.session_id);
        Ok(())
    }

    async fn activate_on(&self, channel: &dyn ServiceInvoker, identity: &IdentityConfig) -> UaResult<()> {
        let request = ActivateSessionRequest {
            request_header: self.request_header(),
            user_identity_token: self.identity_token(identity),
            ..Default::default()
        };
        let response: ActivateSessionResponse = channel
            .invoke(request.into(), self.request_timeout)
            .await?
            .into_typed()?;
        if let Some(bad) = response.results.iter().find(|status| status.is_bad()) {
            return Err(UaError::Service(*bad));
        }
        *self.server_nonce.lock().unwrap_or_else(PoisonError::into_inner) = response.server_nonce;
        Ok(())
    }

    fn identity_token(&self, identity: &IdentityConfig) -> ExtensionObject {
        match identity {
            IdentityConfig::Anonymous => {
                let policy_id = self.policy_id(UserTokenType::Anonymous, "anonymous");
                ExtensionObject::from_encodable(&AnonymousIdentityToken { policy_id })
            }
            IdentityConfig::UserName {
                user_name,
                password,
            } => {
                let policy_id = self.policy_id(UserTokenType::UserName, "username");
                ExtensionObject::from_encodable(&UserNameIdentityToken {
                    policy_id,
                    user_name: user_name.clone(),
                    password: ByteString::from(password.as_bytes()),
                    encryption_algorithm: String::new(),
                })
            }
        }
    }

    fn policy_id(&self, token_type: UserTokenType, fallback: &str) -> String {
        self.endpoints
            .iter()
            .find_map(|endpoint| endpoint.find_user_token_policy(token_type))
            .map(|policy| policy.policy_id.clone())
            .unwrap_or_else(|| fallback.to_string())
    }

    /// Close the session; the state is `Closed` afterwards whatever the outcome
    pub async fn close(&self, delete_subscriptions: bool) -> UaResult<()> {
        if self.state.send_replace(SessionState::Closed) == SessionState::Closed {
            return Ok(());
        }
        log::info!("Closing session {}", self.session_id);
        let request = CloseSessionRequest {
            request_header: self.request_header(),
            delete_subscriptions,
        };
        let channel = self.channel()?;
        let _: CloseSessionResponse = channel
            .invoke(request.into(), self.request_timeout)
            .await?
            .into_typed()?;
        Ok(())
    }

    /// Read the server state once
    pub async fn keep_alive(&self) -> UaResult<DataValue> {
        let request = ReadRequest {
            request_header: RequestHeader::default(),
            nodes_to_read: vec![ReadValueId::value_of(ids::server_state())],
            ..Default::default()
        };
        let response: ReadResponse = self
            .invoke(request.into(), self.request_timeout)
            .await?
            .into_typed()?;
        let value = response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| UaError::Protocol("empty keep-alive read response".to_string()))?;
        if value.status().is_bad() {
            return Err(UaError::Service(value.status()));
        }
        Ok(value)
    }

    /// Poll the server state until too many consecutive reads fail
    ///
    /// Returns once the session is marked lost or closed.
    pub async fn run_keep_alive(&self, interval: Duration, failures_allowed: u32) {
        let mut failures = 0u32;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if self.state() != SessionState::Activated || self.is_lost() {
                return;
            }
            match self.keep_alive().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures += 1;
                    log::warn!(
                        "Keep-alive of session {} failed ({}/{}): {}",
                        self.session_id,
                        failures,
                        failures_allowed + 1,
                        e
                    );
                    if failures > failures_allowed {
                        self.mark_lost(format!("{} keep-alive failures", failures));
                        return;
                    }
                }
            }
        }
    }

    fn request_header(&self) -> RequestHeader {
        RequestHeader::new(
            self.authentication_token.clone(),
            self.next_handle.fetch_add(1, Ordering::Relaxed),
            millis(self.request_timeout),
        )
    }

    fn channel(&self) -> UaResult<Arc<dyn ServiceInvoker>> {
        self.channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
            .ok_or_else(|| UaError::ChannelLost("session has no channel".to_string()))
    }

    pub(crate) fn mark_lost(&self, reason: String) {
        let changed = self.lost.send_if_modified(|lost| {
            if lost.is_none() {
                *lost = Some(reason.clone());
                true
            } else {
                false
            }
        });
        if changed {
            log::warn!("Session {} lost: {}", self.session_id, reason);
        }
    }

    pub fn is_lost(&self) -> bool {
        self.lost.borrow().is_some()
    }

    /// Resolve with the reason once the session is marked lost
    pub async fn lost(&self) -> String {
        let mut lost = self.lost.subscribe();
        match lost.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "session dropped".to_string(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn session_id(&self) -> &NodeId {
        &self.session_id
    }

    pub fn authentication_token(&self) -> &NodeId {
        &self.authentication_token
    }

    pub fn revised_timeout(&self) -> Duration {
        self.revised_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn server_nonce(&self) -> ByteString {
        self.server_nonce
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn endpoints(&self) -> &[EndpointDescription] {
        &self.endpoints
    }

    /// Limits Read and Write requests through the client are split by
    pub fn operation_limits(&self) -> OperationLimits {
        *self.operation_limits.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_operation_limits(&self, limits: OperationLimits) {
        *self.operation_limits.lock().unwrap_or_else(PoisonError::into_inner) = limits;
    }
}

#[async_trait]
impl ServiceInvoker for Session {
    /// Stamp the request header and send the request on the current channel
    async fn invoke(&self, mut request: ServiceRequest, timeout: Duration) -> UaResult<ServiceResponse> {
        match self.state() {
            SessionState::Activated => {}
            SessionState::Created => return Err(UaError::NotActivated),
            SessionState::Closed => return Err(UaError::SessionLost("session closed".to_string())),
        }
        let channel = self.channel()?;
        *request.request_header_mut() = RequestHeader::new(
            self.authentication_token.clone(),
            self.next_handle.fetch_add(1, Ordering::Relaxed),
            millis(timeout),
        );
        let response = channel.invoke(request, timeout).await?;
        let status = response.response_header().service_result;
        if status.is_session_error() {
            self.mark_lost(format!("server reported {}", status));
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::MockServiceInvoker;
    use opcua_core::Variant;
    use opcua_service::{ResponseHeader, UserTokenPolicy};

    fn settings() -> SessionSettings {
        SessionSettings::from(&ClientConfig::default())
    }

    fn create_response() -> ServiceResponse {
        ServiceResponse::from(CreateSessionResponse {
            response_header: ResponseHeader::new(1, StatusCode::GOOD),
            session_id: NodeId::numeric(1, 900),
            authentication_token: NodeId::numeric(1, 901),
            revised_session_timeout: 30_000.0,
            server_endpoints: vec![EndpointDescription {
                user_identity_tokens: vec![UserTokenPolicy {
                    policy_id: "user-pw".to_string(),
                    token_type: UserTokenType::UserName,
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    fn activate_response(handle: u32) -> ServiceResponse {
        ServiceResponse::from(ActivateSessionResponse {
            response_header: ResponseHeader::new(handle, StatusCode::GOOD),
            ..Default::default()
        })
    }

    fn opened_channel() -> MockServiceInvoker {
        let mut mock = MockServiceInvoker::new();
        mock.expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::CreateSessionRequest(_)))
            .times(1)
            .returning(|_, _| Ok(create_response()));
        mock
    }

    #[tokio::test]
    async fn test_calls_before_activation_fail() {
        let channel: Arc<dyn ServiceInvoker> = Arc::new(opened_channel());
        let session = Session::create(&channel, &settings()).await.unwrap();
        assert_eq!(session.state(), SessionState::Created);
        assert_eq!(session.revised_timeout(), Duration::from_secs(30));

        let result = session
            .invoke(ReadRequest::default().into(), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(UaError::NotActivated)));
    }

    #[tokio::test]
    async fn test_activated_session_stamps_requests() {
        let mut mock = opened_channel();
        mock.expect_invoke()
            .withf(|request, _| match request {
                ServiceRequest::ActivateSessionRequest(r) => {
                    let token = r
                        .user_identity_token
                        .decode_as::<UserNameIdentityToken>()
                        .unwrap();
                    r.request_header.authentication_token == NodeId::numeric(1, 901)
                        && token.policy_id == "user-pw"
                        && token.user_name == "operator"
                }
                _ => false,
            })
            .times(1)
            .returning(|r, _| Ok(activate_response(r.request_header().request_handle)));
        mock.expect_invoke()
            .withf(|request, timeout| {
                let header = request.request_header();
                matches!(request, ServiceRequest::ReadRequest(_))
                    && header.authentication_token == NodeId::numeric(1, 901)
                    && header.request_handle != 0
                    && header.timeout_hint == 2500
                    && *timeout == Duration::from_millis(2500)
            })
            .times(1)
            .returning(|r, _| {
                Ok(ServiceResponse::from(ReadResponse {
                    response_header: ResponseHeader::new(r.request_header().request_handle, StatusCode::GOOD),
                    results: vec![DataValue::new(0i32)],
                    diagnostic_infos: Vec::new(),
                }))
            });

        let channel: Arc<dyn ServiceInvoker> = Arc::new(mock);
        let session = Session::create(&channel, &settings()).await.unwrap();
        let identity = IdentityConfig::UserName {
            user_name: "operator".to_string(),
            password: "pw".to_string(),
        };
        session.activate(&identity).await.unwrap();
        assert_eq!(session.state(), SessionState::Activated);

        let response: ReadResponse = session
            .invoke(ReadRequest::default().into(), Duration::from_millis(2500))
            .await
            .unwrap()
            .into_typed()
            .unwrap();
        assert_eq!(response.results[0].value(), &Variant::Int32(0));
    }

    #[tokio::test]
    async fn test_transfer_rejection_is_distinct() {
        let mut mock = opened_channel();
        mock.expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::ActivateSessionRequest(_)))
            .times(1)
            .returning(|r, _| Ok(activate_response(r.request_header().request_handle)));
        let channel: Arc<dyn ServiceInvoker> = Arc::new(mock);
        let session = Session::create(&channel, &settings()).await.unwrap();
        session.activate(&IdentityConfig::Anonymous).await.unwrap();

        let mut rejecting = MockServiceInvoker::new();
        rejecting
            .expect_invoke()
            .times(1)
            .returning(|r, _| {
                Ok(ServiceResponse::fault(
                    r.request_header().request_handle,
                    StatusCode::BAD_SESSION_ID_INVALID,
                ))
            });
        let new_channel: Arc<dyn ServiceInvoker> = Arc::new(rejecting);
        let result = session.transfer(&new_channel).await;
        assert!(matches!(
            result,
            Err(UaError::TransferRejected(s)) if s == StatusCode::BAD_SESSION_ID_INVALID
        ));

        let mut failing = MockServiceInvoker::new();
        failing
            .expect_invoke()
            .times(1)
            .returning(|_, _| Err(UaError::Timeout));
        let flaky_channel: Arc<dyn ServiceInvoker> = Arc::new(failing);
        assert!(matches!(
            session.transfer(&flaky_channel).await,
            Err(UaError::Timeout)
        ));
    }

    #[tokio::test]
    async fn test_transfer_moves_session_to_new_channel() {
        let mut mock = opened_channel();
        mock.expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::ActivateSessionRequest(_)))
            .times(1)
            .returning(|r, _| Ok(activate_response(r.request_header().request_handle)));
        let channel: Arc<dyn ServiceInvoker> = Arc::new(mock);
        let session = Session::create(&channel, &settings()).await.unwrap();
        session.activate(&IdentityConfig::Anonymous).await.unwrap();

        let mut accepting = MockServiceInvoker::new();
        accepting
            .expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::ActivateSessionRequest(_)))
            .times(1)
            .returning(|r, _| Ok(activate_response(r.request_header().request_handle)));
        accepting
            .expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::CloseSessionRequest(_)))
            .times(1)
            .returning(|r, _| {
                Ok(ServiceResponse::from(CloseSessionResponse {
                    response_header: ResponseHeader::new(r.request_header().request_handle, StatusCode::GOOD),
                }))
            });
        let new_channel: Arc<dyn ServiceInvoker> = Arc::new(accepting);
        session.transfer(&new_channel).await.unwrap();
        drop(channel);

        session.close(true).await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_session_fault_marks_session_lost() {
        let mut mock = opened_channel();
        mock.expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::ActivateSessionRequest(_)))
            .returning(|r, _| Ok(activate_response(r.request_header().request_handle)));
        mock.expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::ReadRequest(_)))
            .returning(|r, _| {
                Ok(ServiceResponse::fault(
                    r.request_header().request_handle,
                    StatusCode::BAD_SESSION_CLOSED,
                ))
            });
        let channel: Arc<dyn ServiceInvoker> = Arc::new(mock);
        let session = Session::create(&channel, &settings()).await.unwrap();
        session.activate(&IdentityConfig::Anonymous).await.unwrap();

        let result = session.keep_alive().await;
        assert!(matches!(result, Err(UaError::Service(s)) if s == StatusCode::BAD_SESSION_CLOSED));
        assert!(session.is_lost());
        assert_eq!(session.lost().await, "server reported BadSessionClosed (0x80260000)");
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_failures_mark_session_lost() {
        let mut mock = opened_channel();
        mock.expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::ActivateSessionRequest(_)))
            .returning(|r, _| Ok(activate_response(r.request_header().request_handle)));
        mock.expect_invoke()
            .withf(|request, _| matches!(request, ServiceRequest::ReadRequest(_)))
            .times(2)
            .returning(|_, _| Err(UaError::Timeout));
        let channel: Arc<dyn ServiceInvoker> = Arc::new(mock);
        let session = Session::create(&channel, &settings()).await.unwrap();
        session.activate(&IdentityConfig::Anonymous).await.unwrap();

        session.run_keep_alive(Duration::from_secs(5), 1).await;
        assert!(session.is_lost());
    }
}
