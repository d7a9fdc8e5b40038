//! Secure channel
//!
//! ```text
//!   invoke() ──register──> correlator <──complete── reader task <── transport
//!      │                       ^                                      ^
//!      └──> outgoing queue ────┼────────> writer task ────────────────┘
//!                              │
//!   renewal task ──────────────┘  (OpenSecureChannel Renew, same path)
//! ```
//!
//! The writer task is the only writer of the stream and assigns sequence
//! numbers in wire order. The reader task verifies, reassembles and routes
//! responses by request id. Renewal is an ordinary request and never blocks
//! other traffic.

use crate::chunk::{
    AsymmetricSecurityHeader, ChunkPrefix, ChunkWriter, Protection, SecurityHeader, open_chunk,
};
use crate::config::ChannelConfig;
use crate::correlator::Correlator;
use crate::hello::{
    AcknowledgeMessage, ErrorMessage, NegotiatedLimits, PROTOCOL_VERSION, TransportLimits,
    frame_message,
};
use crate::message::{ChunkType, MESSAGE_HEADER_LEN, MessageHeader, MessageType, read_chunk};
use crate::reassembly::{MessageReassembler, Reassembled};
use crate::sequence::{ReceiveSequence, SendSequence};
use crate::state::ChannelState;
use crate::statistics::{ChannelStatistics, ChannelStatisticsSnapshot};
use crate::token::{SecurityToken, TokenSet};
use opcua_core::{BinaryDecoder, BinaryEncodable, ByteString, NodeId, UaError, UaResult};
use opcua_security::{
    AsymmetricSecurity, ChannelKeys, SecurityPolicy, SymmetricSecurity, generate_nonce,
};
use opcua_service::{
    CloseSecureChannelRequest, MessageSecurityMode, OpenSecureChannelRequest,
    OpenSecureChannelResponse, RequestHeader, SecurityTokenRequestType, ServiceRequest,
    ServiceResponse, ServiceResponseType,
};
use opcua_transport::{ByteStream, TransportLayer};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long `close()` waits for CloseSecureChannel to be written
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A message queued for the writer task
#[derive(Debug)]
struct Outgoing {
    message_type: MessageType,
    request_id: u32,
    body: Vec<u8>,
    /// Whether the correlator tracks `request_id`
    tracked: bool,
    written: Option<oneshot::Sender<UaResult<()>>>,
}

#[derive(Debug)]
struct ChannelCore {
    endpoint_url: String,
    config: ChannelConfig,
    limits: NegotiatedLimits,
    channel_id: AtomicU32,
    tokens: Mutex<Option<TokenSet>>,
    correlator: Arc<Correlator>,
    statistics: Arc<ChannelStatistics>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    state: watch::Sender<ChannelState>,
    renew_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// An open secure channel to one server endpoint
///
/// Dropping the channel stops its tasks; pending requests then fail with
/// `UaError::ChannelLost`.
pub struct SecureChannel {
    core: Arc<ChannelCore>,
}

impl fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureChannel")
            .field("endpoint_url", &self.core.endpoint_url)
            .field("channel_id", &self.core.channel_id())
            .field("state", &self.core.state())
            .finish()
    }
}

impl SecureChannel {
    /// Connect, run the Hello/Acknowledge handshake and issue the first token
    ///
    /// # Errors
    ///
    /// * `UaError::Config` - inconsistent security settings
    /// * `UaError::Connection` / `UaError::Transport` - the connection failed
    /// * `UaError::Service` - the server rejected the handshake or the
    ///   OpenSecureChannel request
    /// * `UaError::Timeout` - the handshake did not complete in time
    pub async fn open(transport: &dyn TransportLayer, config: ChannelConfig) -> UaResult<Self> {
        config.validate()?;
        let endpoint_url = transport.endpoint_url().to_string();
        log::info!(
            "Opening secure channel to {} (policy {}, mode {:?})",
            endpoint_url,
            config.security_policy,
            config.security_mode
        );

        let stream = transport.open().await?;
        let (mut reader, mut writer) = tokio::io::split(stream);
        let limits = tokio::time::timeout(
            config.handshake_timeout,
            handshake(&mut reader, &mut writer, &endpoint_url, &config.limits),
        )
        .await
        .map_err(|_| UaError::Timeout)??;
        log::debug!("Negotiated transport limits {:?}", limits);

        let statistics = Arc::new(ChannelStatistics::new());
        let (outgoing, queue) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(ChannelState::Connecting);
        let handshake_timeout = config.handshake_timeout;
        let core = Arc::new(ChannelCore {
            endpoint_url,
            config,
            limits,
            channel_id: AtomicU32::new(0),
            tokens: Mutex::new(None),
            correlator: Arc::new(Correlator::new(Arc::clone(&statistics))),
            statistics,
            outgoing,
            state,
            renew_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        });
        core.add_task(tokio::spawn(run_writer(Arc::clone(&core), queue, writer)));
        core.add_task(tokio::spawn(run_reader(Arc::clone(&core), reader)));

        if let Err(e) = core
            .open_secure_channel(SecurityTokenRequestType::Issue, handshake_timeout)
            .await
        {
            log::error!("OpenSecureChannel to {} failed: {}", core.endpoint_url, e);
            core.shutdown(ChannelState::Closed, "open failed");
            return Err(e);
        }
        if !core.transition(ChannelState::Open) {
            core.shutdown(ChannelState::Closed, "open failed");
            return Err(UaError::ChannelLost(
                "channel lost while opening".to_string(),
            ));
        }
        log::info!(
            "Secure channel {} open to {}",
            core.channel_id(),
            core.endpoint_url
        );
        core.add_task(tokio::spawn(run_renewal(Arc::clone(&core))));
        Ok(Self { core })
    }

    /// Send a request and wait for its response
    ///
    /// Dropping the returned future cancels the request; a response arriving
    /// later is discarded.
    ///
    /// # Errors
    ///
    /// * `UaError::Timeout` - no response within `timeout`; the outcome is unknown
    /// * `UaError::ChannelLost` - the channel failed or is not open
    /// * `UaError::Protocol` - the response could not be decoded
    pub async fn invoke(
        &self,
        request: impl Into<ServiceRequest>,
        timeout: Duration,
    ) -> UaResult<ServiceResponse> {
        self.core
            .request(MessageType::Message, request.into(), timeout)
            .await
    }

    /// Send a request and convert the response to the expected type
    ///
    /// A service fault or a `Bad` service result becomes `UaError::Service`.
    pub async fn call<T: ServiceResponseType>(
        &self,
        request: impl Into<ServiceRequest>,
        timeout: Duration,
    ) -> UaResult<T> {
        self.invoke(request, timeout).await?.into_typed()
    }

    /// Renew the security token now instead of waiting for the schedule
    pub async fn renew(&self) -> UaResult<()> {
        self.core.renew().await
    }

    /// Send CloseSecureChannel and stop the channel tasks
    ///
    /// Pending requests fail with `UaError::ChannelLost`.
    pub async fn close(&self) {
        let core = &self.core;
        if !core.transition(ChannelState::Closing) {
            core.shutdown(ChannelState::Closed, "channel closed");
            return;
        }
        log::info!("Closing secure channel {}", core.channel_id());
        let request_id = core.correlator.next_request_id();
        let request = ServiceRequest::from(CloseSecureChannelRequest {
            request_header: RequestHeader::new(NodeId::NULL, request_id, 0),
        });
        let (written, done) = oneshot::channel();
        let queued = core.outgoing.send(Outgoing {
            message_type: MessageType::CloseSecureChannel,
            request_id,
            body: request.to_bytes(),
            tracked: false,
            written: Some(written),
        });
        if queued.is_ok() && tokio::time::timeout(CLOSE_TIMEOUT, done).await.is_err() {
            log::debug!("CloseSecureChannel not written in time");
        }
        core.shutdown(ChannelState::Closed, "channel closed");
    }

    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    /// Receiver notified on every state change
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.core.state.subscribe()
    }

    /// Resolve once the channel is closed or lost
    pub async fn closed(&self) -> ChannelState {
        let mut changes = self.state_changes();
        match changes.wait_for(|state| state.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => ChannelState::Lost,
        }
    }

    pub fn channel_id(&self) -> u32 {
        self.core.channel_id()
    }

    /// Id of the token used for sending
    pub fn token_id(&self) -> Option<u32> {
        self.core.tokens().as_ref().map(|t| t.current().token_id)
    }

    pub fn is_renewing(&self) -> bool {
        self.core.tokens().as_ref().is_some_and(|t| t.is_renewing())
    }

    pub fn endpoint_url(&self) -> &str {
        &self.core.endpoint_url
    }

    pub fn security_policy(&self) -> SecurityPolicy {
        self.core.config.security_policy
    }

    pub fn security_mode(&self) -> MessageSecurityMode {
        self.core.config.security_mode
    }

    pub fn limits(&self) -> &NegotiatedLimits {
        &self.core.limits
    }

    pub fn pending_requests(&self) -> usize {
        self.core.correlator.pending_count()
    }

    pub fn statistics(&self) -> ChannelStatisticsSnapshot {
        self.core.statistics.snapshot()
    }
}

impl Drop for SecureChannel {
    fn drop(&mut self) {
        if !self.core.state().is_terminal() {
            self.core.shutdown(ChannelState::Lost, "channel dropped");
        }
    }
}

async fn handshake<R, W>(
    reader: &mut R,
    writer: &mut W,
    endpoint_url: &str,
    limits: &TransportLimits,
) -> UaResult<NegotiatedLimits>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let hello = frame_message(MessageType::Hello, &limits.hello(endpoint_url));
    writer.write_all(&hello).await?;
    writer.flush().await?;

    let (header, raw) = read_chunk(reader, limits.receive_buffer_size as usize).await?;
    let mut decoder = BinaryDecoder::new(&raw[MESSAGE_HEADER_LEN..]);
    match header.message_type {
        MessageType::Acknowledge => {
            let ack: AcknowledgeMessage = decoder.decode()?;
            limits.negotiate(&ack)
        }
        MessageType::Error => {
            let error: ErrorMessage = decoder.decode()?;
            log::error!(
                "Server rejected Hello: {} ({})",
                error.error,
                error.reason
            );
            Err(UaError::Service(error.error))
        }
        other => Err(UaError::Transport(format!(
            "expected Acknowledge, received {:?}",
            other
        ))),
    }
}

impl ChannelCore {
    fn tokens(&self) -> MutexGuard<'_, Option<TokenSet>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn channel_id(&self) -> u32 {
        self.channel_id.load(Ordering::SeqCst)
    }

    fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    fn add_task(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    fn abort_tasks(&self) {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
    }

    /// Apply a valid state transition; returns whether the state changed
    fn transition(&self, to: ChannelState) -> bool {
        self.state.send_if_modified(|state| {
            if state.validate_transition(to).is_ok() {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    fn asymmetric(&self) -> Option<&dyn AsymmetricSecurity> {
        if self.config.security_policy.is_none() {
            None
        } else {
            self.config.asymmetric.as_deref()
        }
    }

    /// Fatal failure: fail every pending request and stop the tasks
    fn mark_lost(&self, reason: &str) {
        if self.state() == ChannelState::Closing {
            log::debug!("Ignoring '{}' while closing", reason);
            return;
        }
        if !self.transition(ChannelState::Lost) {
            return;
        }
        log::error!("Secure channel {} lost: {}", self.channel_id(), reason);
        self.correlator
            .fail_all(|| UaError::ChannelLost(reason.to_string()));
        self.abort_tasks();
    }

    fn shutdown(&self, target: ChannelState, reason: &str) {
        self.transition(target);
        self.correlator
            .fail_all(|| UaError::ChannelLost(reason.to_string()));
        self.abort_tasks();
    }

    async fn request(
        &self,
        message_type: MessageType,
        mut request: ServiceRequest,
        timeout: Duration,
    ) -> UaResult<ServiceResponse> {
        let state = self.state();
        let allowed = match message_type {
            MessageType::OpenSecureChannel => {
                matches!(state, ChannelState::Connecting | ChannelState::Open)
            }
            _ => state.is_open(),
        };
        if !allowed {
            return Err(UaError::ChannelLost(format!("channel is {}", state)));
        }

        let pending = self.correlator.register(request.name(), timeout);
        let header = request.request_header_mut();
        if header.request_handle == 0 {
            header.request_handle = pending.request_id();
        }
        self.outgoing
            .send(Outgoing {
                message_type,
                request_id: pending.request_id(),
                body: request.to_bytes(),
                tracked: true,
                written: None,
            })
            .map_err(|_| UaError::ChannelLost("writer stopped".to_string()))?;
        pending.wait().await
    }

    async fn open_secure_channel(
        &self,
        request_type: SecurityTokenRequestType,
        timeout: Duration,
    ) -> UaResult<()> {
        let policy = self.config.security_policy;
        let client_nonce = if policy.is_none() {
            ByteString::null()
        } else {
            ByteString::from(generate_nonce(policy.nonce_length())?)
        };
        let timeout_hint = timeout.as_millis().min(u32::MAX as u128) as u32;
        let request = OpenSecureChannelRequest {
            request_header: RequestHeader::new(NodeId::NULL, 0, timeout_hint),
            client_protocol_version: PROTOCOL_VERSION,
            request_type,
            security_mode: self.config.security_mode,
            client_nonce: client_nonce.clone(),
            requested_lifetime: self.config.requested_lifetime_millis(),
        };
        let response: OpenSecureChannelResponse = self
            .request(MessageType::OpenSecureChannel, request.into(), timeout)
            .await?
            .into_typed()?;

        let issued = &response.security_token;
        match request_type {
            SecurityTokenRequestType::Issue => {
                self.channel_id.store(issued.channel_id, Ordering::SeqCst);
            }
            SecurityTokenRequestType::Renew if issued.channel_id != self.channel_id() => {
                return Err(UaError::Security(format!(
                    "renewed token belongs to channel {}",
                    issued.channel_id
                )));
            }
            SecurityTokenRequestType::Renew => {}
        }
        let lifetime = Duration::from_millis(issued.revised_lifetime as u64);
        if lifetime.is_zero() {
            return Err(UaError::Protocol(
                "server revised token lifetime to zero".to_string(),
            ));
        }
        let security = if policy.is_none() {
            None
        } else {
            let keys = ChannelKeys::derive(
                policy,
                client_nonce.as_slice(),
                response.server_nonce.as_slice(),
            )?;
            let encrypt = self.config.security_mode == MessageSecurityMode::SignAndEncrypt;
            Some(Arc::new(SymmetricSecurity::new(policy, encrypt, keys)?))
        };
        let token = SecurityToken {
            channel_id: issued.channel_id,
            token_id: issued.token_id,
            created_at: Instant::now(),
            lifetime,
            security,
        };
        log::info!(
            "Channel {} token {} issued, lifetime {:?}",
            issued.channel_id,
            issued.token_id,
            lifetime
        );
        let mut tokens = self.tokens();
        match tokens.as_mut() {
            Some(set) => set.install(token),
            None => *tokens = Some(TokenSet::new(token)),
        }
        Ok(())
    }

    async fn renew(&self) -> UaResult<()> {
        let _renewing = self.renew_lock.lock().await;
        let expires_at = {
            let mut tokens = self.tokens();
            let set = tokens
                .as_mut()
                .ok_or_else(|| UaError::InvalidState("channel has no token".to_string()))?;
            set.set_renewing(true);
            set.current().expires_at()
        };
        let timeout = expires_at.saturating_duration_since(Instant::now());
        let result = if timeout.is_zero() {
            Err(UaError::Security("security token expired".to_string()))
        } else {
            self.open_secure_channel(SecurityTokenRequestType::Renew, timeout)
                .await
        };
        match &result {
            Ok(()) => self.statistics.increment_renewals(),
            Err(_) => {
                if let Some(set) = self.tokens().as_mut() {
                    set.set_renewing(false);
                }
            }
        }
        result
    }

    /// When the current token should be renewed
    fn renew_at(&self) -> Option<Instant> {
        let tokens = self.tokens();
        let current = tokens.as_ref()?.current();
        Some(current.renew_at(self.config.renew_margin_for(current.lifetime)))
    }

    fn encode(&self, outgoing: &Outgoing, sequence: &mut SendSequence) -> UaResult<Vec<Vec<u8>>> {
        let limits = &self.limits;
        if outgoing.message_type == MessageType::OpenSecureChannel {
            let (security_header, protection) = match self.asymmetric() {
                Some(asymmetric) => (
                    AsymmetricSecurityHeader::for_security(asymmetric),
                    Protection::Asymmetric(asymmetric),
                ),
                None => (AsymmetricSecurityHeader::none(), Protection::None),
            };
            let writer = ChunkWriter {
                message_type: outgoing.message_type,
                secure_channel_id: self.channel_id(),
                security_header: SecurityHeader::Asymmetric(security_header),
                protection,
                max_chunk_size: limits.send_buffer_size,
                max_chunk_count: limits.max_send_chunk_count,
                max_message_size: limits.max_send_message_size,
            };
            return writer.write(outgoing.request_id, &outgoing.body, sequence);
        }

        let (token_id, security) = {
            let tokens = self.tokens();
            let current = tokens
                .as_ref()
                .ok_or_else(|| UaError::InvalidState("channel has no token".to_string()))?
                .current();
            (current.token_id, current.security.clone())
        };
        let protection = match &security {
            Some(security) => Protection::Symmetric(security),
            None => Protection::None,
        };
        let writer = ChunkWriter {
            message_type: outgoing.message_type,
            secure_channel_id: self.channel_id(),
            security_header: SecurityHeader::Symmetric { token_id },
            protection,
            max_chunk_size: limits.send_buffer_size,
            max_chunk_count: limits.max_send_chunk_count,
            max_message_size: limits.max_send_message_size,
        };
        writer.write(outgoing.request_id, &outgoing.body, sequence)
    }

    /// Process one received chunk; errors are fatal to the channel
    fn handle_chunk(
        &self,
        header: MessageHeader,
        raw: Vec<u8>,
        sequence: &mut ReceiveSequence,
        reassembler: &mut MessageReassembler,
    ) -> UaResult<()> {
        self.statistics.increment_chunks_received();
        match header.message_type {
            MessageType::Error => {
                let error = ErrorMessage::from_bytes(&raw[MESSAGE_HEADER_LEN..])?;
                return Err(UaError::ChannelLost(format!(
                    "server error {}: {}",
                    error.error, error.reason
                )));
            }
            MessageType::OpenSecureChannel | MessageType::Message => {}
            other => {
                return Err(UaError::Transport(format!("unexpected {:?} message", other)));
            }
        }

        let prefix = ChunkPrefix::parse(&raw)?;
        let channel_id = self.channel_id();
        if channel_id != 0 && prefix.secure_channel_id != channel_id {
            return Err(UaError::Security(format!(
                "chunk for channel {} received on channel {}",
                prefix.secure_channel_id, channel_id
            )));
        }
        let chunk = match prefix.security_header.token_id() {
            None => {
                let protection = match self.asymmetric() {
                    Some(asymmetric) => {
                        if let SecurityHeader::Asymmetric(security_header) = &prefix.security_header
                        {
                            asymmetric.validate_remote_certificate(
                                security_header.sender_certificate.as_slice(),
                            )?;
                        }
                        Protection::Asymmetric(asymmetric)
                    }
                    None => Protection::None,
                };
                open_chunk(raw, prefix, protection)?
            }
            Some(token_id) => {
                let security = self
                    .tokens()
                    .as_mut()
                    .ok_or_else(|| UaError::Security("message before token issue".to_string()))?
                    .for_receive(token_id, Instant::now())?;
                let protection = match &security {
                    Some(security) => Protection::Symmetric(security),
                    None => Protection::None,
                };
                open_chunk(raw, prefix, protection)?
            }
        };
        sequence.check(chunk.sequence_header.sequence_number)?;

        for request_id in self.correlator.take_abandoned() {
            if reassembler.discard(request_id) {
                log::debug!("Dropped partial response to abandoned request {}", request_id);
            }
        }
        let request_id = chunk.request_id();
        if !self.correlator.is_pending(request_id) {
            reassembler.discard(request_id);
            if chunk.header.chunk_type != ChunkType::Intermediate {
                self.statistics.increment_discarded_responses();
                log::debug!("Discarding response to unknown request {}", request_id);
            }
            return Ok(());
        }

        match reassembler.push(chunk) {
            Reassembled::Incomplete => {}
            Reassembled::Complete { request_id, body } => {
                self.statistics.increment_messages_received();
                let response = ServiceResponse::from_bytes(&body)
                    .map_err(|e| UaError::Protocol(format!("undecodable response: {}", e)));
                if let Err(e) = &response {
                    log::warn!("Response to request {}: {}", request_id, e);
                }
                self.correlator.complete(request_id, response);
            }
            Reassembled::Failed { request_id, error } => {
                self.statistics.increment_aborted_messages();
                self.correlator.complete(request_id, Err(error));
            }
        }
        Ok(())
    }
}

async fn run_writer(
    core: Arc<ChannelCore>,
    mut queue: mpsc::UnboundedReceiver<Outgoing>,
    mut writer: WriteHalf<Box<dyn ByteStream>>,
) {
    let mut sequence = SendSequence::new();
    while let Some(outgoing) = queue.recv().await {
        let chunks = match core.encode(&outgoing, &mut sequence) {
            Ok(chunks) => chunks,
            Err(e) => {
                log::warn!(
                    "Cannot encode {:?} message for request {}: {}",
                    outgoing.message_type,
                    outgoing.request_id,
                    e
                );
                if outgoing.tracked {
                    core.correlator.complete(outgoing.request_id, Err(e));
                } else if let Some(written) = outgoing.written {
                    let _ = written.send(Err(e));
                }
                continue;
            }
        };
        let count = chunks.len() as u64;
        if let Err(e) = write_chunks(&mut writer, &chunks).await {
            core.mark_lost(&format!("write failed: {}", e));
            return;
        }
        core.statistics.increment_chunks_sent(count);
        core.statistics.increment_messages_sent();
        if let Some(written) = outgoing.written {
            let _ = written.send(Ok(()));
        }
    }
}

async fn write_chunks<W: AsyncWrite + Unpin>(
    writer: &mut W,
    chunks: &[Vec<u8>],
) -> std::io::Result<()> {
    for chunk in chunks {
        writer.write_all(chunk).await?;
    }
    writer.flush().await
}

async fn run_reader(core: Arc<ChannelCore>, mut reader: ReadHalf<Box<dyn ByteStream>>) {
    let mut sequence = ReceiveSequence::new();
    let mut reassembler = MessageReassembler::new(
        core.limits.max_receive_message_size,
        core.limits.max_receive_chunk_count,
    );
    loop {
        let result = match read_chunk(&mut reader, core.limits.receive_buffer_size).await {
            Ok((header, raw)) => core.handle_chunk(header, raw, &mut sequence, &mut reassembler),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            core.mark_lost(&e.to_string());
            return;
        }
    }
}

async fn run_renewal(core: Arc<ChannelCore>) {
    loop {
        let Some(renew_at) = core.renew_at() else {
            return;
        };
        tokio::time::sleep_until(renew_at).await;
        if !core.state().is_open() {
            return;
        }
        // Renewed on request while sleeping
        if core.renew_at().is_some_and(|at| at > Instant::now()) {
            continue;
        }
        log::info!("Renewing security token of channel {}", core.channel_id());
        if let Err(e) = core.renew().await {
            core.mark_lost(&format!("security token renewal failed: {}", e));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::MessageChunk;
    use crate::hello::HelloMessage;
    use opcua_core::{DataValue, StatusCode, Variant};
    use opcua_service::{
        ChannelSecurityToken, ReadRequest, ReadResponse, ReadValueId, ResponseHeader,
    };
    use opcua_transport::{MemoryListener, MemoryTransport};
    use tokio::io::DuplexStream;

    const URL: &str = "opc.tcp://memory:4840";

    /// Pass-through asymmetric protection for both ends of a test channel
    #[derive(Debug)]
    struct PassThrough;

    impl AsymmetricSecurity for PassThrough {
        fn policy(&self) -> SecurityPolicy {
            SecurityPolicy::Basic256Sha256
        }

        fn local_certificate(&self) -> Vec<u8> {
            vec![0x30, 0x00]
        }

        fn remote_certificate_thumbprint(&self) -> Vec<u8> {
            vec![0x11; 20]
        }

        fn seal(&self, mut chunk: Vec<u8>, _header_len: usize) -> UaResult<Vec<u8>> {
            let size = chunk.len() as u32;
            chunk[4..8].copy_from_slice(&size.to_le_bytes());
            Ok(chunk)
        }

        fn unseal(&self, chunk: Vec<u8>, _header_len: usize) -> UaResult<Vec<u8>> {
            Ok(chunk)
        }
    }

    /// Scripted server end of one connection
    struct TestServer {
        stream: DuplexStream,
        sequence: SendSequence,
        channel_id: u32,
        token_id: u32,
        policy: SecurityPolicy,
        encrypt: bool,
        security: Option<SymmetricSecurity>,
    }

    impl TestServer {
        async fn accept(listener: &MemoryListener) -> Self {
            let mut stream = listener.accept().await.unwrap();
            let (header, raw) = read_chunk(&mut stream, 0).await.unwrap();
            assert_eq!(header.message_type, MessageType::Hello);
            let hello = HelloMessage::from_bytes(&raw[MESSAGE_HEADER_LEN..]).unwrap();
            assert_eq!(hello.endpoint_url, URL);
            let ack = AcknowledgeMessage {
                protocol_version: 0,
                receive_buffer_size: 65535,
                send_buffer_size: 65535,
                max_message_size: 0,
                max_chunk_count: 0,
            };
            stream
                .write_all(&frame_message(MessageType::Acknowledge, &ack))
                .await
                .unwrap();
            Self {
                stream,
                sequence: SendSequence::new(),
                channel_id: 0,
                token_id: 0,
                policy: SecurityPolicy::None,
                encrypt: false,
                security: None,
            }
        }

        async fn read_chunk(&mut self) -> MessageChunk {
            let (_, raw) = read_chunk(&mut self.stream, 0).await.unwrap();
            let prefix = ChunkPrefix::parse(&raw).unwrap();
            let protection = match (&prefix.security_header, &self.security) {
                (SecurityHeader::Asymmetric(_), _) if !self.policy.is_none() => {
                    Protection::Asymmetric(&PassThrough)
                }
                (SecurityHeader::Symmetric { .. }, Some(security)) => {
                    Protection::Symmetric(security)
                }
                _ => Protection::None,
            };
            open_chunk(raw, prefix, protection).unwrap()
        }

        async fn read_request(&mut self) -> (MessageChunk, ServiceRequest) {
            let chunk = self.read_chunk().await;
            let request = ServiceRequest::from_bytes(&chunk.body).unwrap();
            (chunk, request)
        }

        /// Answer an OpenSecureChannel request with a new token
        async fn answer_open(&mut self, lifetime_ms: u32) -> (MessageChunk, OpenSecureChannelRequest) {
            let (chunk, request) = self.read_request().await;
            let ServiceRequest::OpenSecureChannelRequest(open) = request else {
                panic!("expected OpenSecureChannel, got {}", request.name());
            };
            self.channel_id = 77;
            self.token_id += 1;
            let server_nonce = if self.policy.is_none() {
                ByteString::null()
            } else {
                ByteString::from(vec![0x5A; 32])
            };
            let response = ServiceResponse::from(OpenSecureChannelResponse {
                response_header: ResponseHeader::new(
                    open.request_header.request_handle,
                    StatusCode::GOOD,
                ),
                server_protocol_version: 0,
                security_token: ChannelSecurityToken {
                    channel_id: self.channel_id,
                    token_id: self.token_id,
                    created_at: opcua_core::DateTime::now(),
                    revised_lifetime: lifetime_ms,
                },
                server_nonce: server_nonce.clone(),
            });
            self.send(MessageType::OpenSecureChannel, None, chunk.request_id(), &response)
                .await;
            if !self.policy.is_none() {
                let keys = ChannelKeys::derive(
                    self.policy,
                    server_nonce.as_slice(),
                    open.client_nonce.as_slice(),
                )
                .unwrap();
                self.security = Some(SymmetricSecurity::new(self.policy, self.encrypt, keys).unwrap());
            }
            (chunk, open)
        }

        async fn send(
            &mut self,
            message_type: MessageType,
            token_id: Option<u32>,
            request_id: u32,
            response: &ServiceResponse,
        ) {
            let (security_header, protection) = match message_type {
                MessageType::OpenSecureChannel => {
                    let header = SecurityHeader::Asymmetric(AsymmetricSecurityHeader::none());
                    if self.policy.is_none() {
                        (header, Protection::None)
                    } else {
                        (header, Protection::Asymmetric(&PassThrough))
                    }
                }
                _ => {
                    let header = SecurityHeader::Symmetric {
                        token_id: token_id.unwrap_or(self.token_id),
                    };
                    match &self.security {
                        Some(security) => (header, Protection::Symmetric(security)),
                        None => (header, Protection::None),
                    }
                }
            };
            let writer = ChunkWriter {
                message_type,
                secure_channel_id: self.channel_id,
                security_header,
                protection,
                max_chunk_size: 65535,
                max_chunk_count: 0,
                max_message_size: 0,
            };
            let chunks = writer
                .write(request_id, &response.to_bytes(), &mut self.sequence)
                .unwrap();
            for chunk in chunks {
                self.stream.write_all(&chunk).await.unwrap();
            }
        }

        /// Answer the next request with a read response carrying `value`
        async fn answer_read(&mut self, token_id: Option<u32>, value: i32) -> MessageChunk {
            let (chunk, request) = self.read_request().await;
            let handle = request.request_header().request_handle;
            let response = ServiceResponse::from(ReadResponse {
                response_header: ResponseHeader::new(handle, StatusCode::GOOD),
                results: vec![DataValue::new(value)],
                diagnostic_infos: Vec::new(),
            });
            self.send(MessageType::Message, token_id, chunk.request_id(), &response)
                .await;
            chunk
        }
    }

    fn read_request() -> ReadRequest {
        ReadRequest {
            nodes_to_read: vec![ReadValueId::value_of(NodeId::numeric(2, 1))],
            ..Default::default()
        }
    }

    fn read_value(response: ReadResponse) -> i32 {
        match response.results[0].value() {
            Variant::Int32(v) => *v,
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_open_and_invoke() {
        let (transport, listener) = MemoryTransport::pair(URL);
        let server = tokio::spawn(async move {
            let mut server = TestServer::accept(&listener).await;
            let (chunk, open) = server.answer_open(600_000).await;
            assert_eq!(chunk.sequence_header.sequence_number, 1);
            assert_eq!(open.request_type, SecurityTokenRequestType::Issue);
            assert_eq!(open.requested_lifetime, 3_600_000);
            let read = server.answer_read(None, 42).await;
            assert_eq!(read.sequence_header.sequence_number, 2);
            assert_eq!(read.secure_channel_id, 77);
            server
        });

        let channel = SecureChannel::open(&transport, ChannelConfig::default())
            .await
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Open);
        assert_eq!(channel.channel_id(), 77);
        assert_eq!(channel.token_id(), Some(1));

        let response: ReadResponse = channel
            .call(read_request(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(read_value(response), 42);
        let _server = server.await.unwrap();
        let statistics = channel.statistics();
        assert_eq!(statistics.messages_sent, 2);
        assert_eq!(statistics.messages_received, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renewal_before_expiry_and_dual_token_decoding() {
        let (transport, listener) = MemoryTransport::pair(URL);
        let server = tokio::spawn(async move {
            let mut server = TestServer::accept(&listener).await;
            server.answer_open(60_000).await;
            let opened_at = Instant::now();

            let (_, renew) = server.answer_open(60_000).await;
            let renewed_after = opened_at.elapsed();
            assert_eq!(renew.request_type, SecurityTokenRequestType::Renew);

            // Client switched to token 2; answer under the previous token
            let read = server.answer_read(Some(1), 1).await;
            assert_eq!(read.security_header.token_id(), Some(2));
            // Answer under the new token, which retires token 1
            server.answer_read(Some(2), 2).await;
            // Token 1 is no longer acceptable
            server.answer_read(Some(1), 3).await;
            renewed_after
        });

        let config = ChannelConfig::default().with_renew_margin(Duration::from_secs(10));
        let channel = SecureChannel::open(&transport, config).await.unwrap();
        let mut changes = channel.state_changes();

        tokio::time::sleep(Duration::from_secs(55)).await;
        assert_eq!(channel.token_id(), Some(2));
        assert!(!channel.is_renewing());
        assert_eq!(channel.statistics().renewals, 1);

        let first: ReadResponse = channel.call(read_request(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(read_value(first), 1);
        let second: ReadResponse = channel.call(read_request(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(read_value(second), 2);
        let third = channel.invoke(read_request(), Duration::from_secs(5)).await;
        assert!(matches!(third, Err(UaError::ChannelLost(_))));

        changes.wait_for(|s| *s == ChannelState::Lost).await.unwrap();
        let renewed_after = server.await.unwrap();
        assert!(renewed_after >= Duration::from_secs(50));
        assert!(renewed_after < Duration::from_secs(51));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_renewal_loses_channel() {
        let (transport, listener) = MemoryTransport::pair(URL);
        let server = tokio::spawn(async move {
            let mut server = TestServer::accept(&listener).await;
            server.answer_open(60_000).await;
            let (chunk, request) = server.read_request().await;
            let fault = ServiceResponse::fault(
                request.request_header().request_handle,
                StatusCode::BAD_SECURITY_CHECKS_FAILED,
            );
            server
                .send(MessageType::OpenSecureChannel, None, chunk.request_id(), &fault)
                .await;
            server
        });

        let config = ChannelConfig::default().with_renew_margin(Duration::from_secs(10));
        let channel = SecureChannel::open(&transport, config).await.unwrap();
        assert_eq!(channel.closed().await, ChannelState::Lost);
        let _server = server.await.unwrap();
        assert!(matches!(
            channel.invoke(read_request(), Duration::from_secs(1)).await,
            Err(UaError::ChannelLost(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_channel_open() {
        let (transport, listener) = MemoryTransport::pair(URL);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let mut server = TestServer::accept(&listener).await;
            server.answer_open(600_000).await;
            let (chunk, request) = server.read_request().await;
            release_rx.await.unwrap();
            let response = ServiceResponse::from(ReadResponse {
                response_header: ResponseHeader::new(
                    request.request_header().request_handle,
                    StatusCode::GOOD,
                ),
                ..Default::default()
            });
            server
                .send(MessageType::Message, None, chunk.request_id(), &response)
                .await;
            server.answer_read(None, 5).await;
            server
        });

        let channel = SecureChannel::open(&transport, ChannelConfig::default())
            .await
            .unwrap();
        let late = channel.invoke(read_request(), Duration::from_secs(2)).await;
        assert!(matches!(late, Err(UaError::Timeout)));
        release_tx.send(()).unwrap();

        let next: ReadResponse = channel.call(read_request(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(read_value(next), 5);
        assert_eq!(channel.state(), ChannelState::Open);
        let statistics = channel.statistics();
        assert_eq!(statistics.timeouts, 1);
        assert_eq!(statistics.discarded_responses, 1);
        let _server = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_server_error_fails_pending_requests() {
        let (transport, listener) = MemoryTransport::pair(URL);
        let server = tokio::spawn(async move {
            let mut server = TestServer::accept(&listener).await;
            server.answer_open(600_000).await;
            let _ = server.read_request().await;
            let error = ErrorMessage {
                error: StatusCode::BAD_TCP_INTERNAL_ERROR,
                reason: "shutting down".to_string(),
            };
            server
                .stream
                .write_all(&frame_message(MessageType::Error, &error))
                .await
                .unwrap();
            server
        });

        let channel = SecureChannel::open(&transport, ChannelConfig::default())
            .await
            .unwrap();
        let result = channel.invoke(read_request(), Duration::from_secs(5)).await;
        match result {
            Err(UaError::ChannelLost(reason)) => assert!(reason.contains("BadTcpInternalError")),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(channel.state(), ChannelState::Lost);
        let _server = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_sends_close_message() {
        let (transport, listener) = MemoryTransport::pair(URL);
        let server = tokio::spawn(async move {
            let mut server = TestServer::accept(&listener).await;
            server.answer_open(600_000).await;
            let (chunk, request) = server.read_request().await;
            assert_eq!(chunk.header.message_type, MessageType::CloseSecureChannel);
            assert_eq!(request.name(), "CloseSecureChannelRequest");
        });

        let channel = SecureChannel::open(&transport, ChannelConfig::default())
            .await
            .unwrap();
        channel.close().await;
        assert_eq!(channel.state(), ChannelState::Closed);
        server.await.unwrap();
        assert!(matches!(
            channel.invoke(read_request(), Duration::from_secs(1)).await,
            Err(UaError::ChannelLost(_))
        ));
    }

    #[tokio::test]
    async fn test_hello_rejected() {
        let (transport, listener) = MemoryTransport::pair(URL);
        tokio::spawn(async move {
            let mut stream = listener.accept().await.unwrap();
            let _ = read_chunk(&mut stream, 0).await.unwrap();
            let error = ErrorMessage {
                error: StatusCode::BAD_TCP_ENDPOINT_URL_INVALID,
                reason: String::new(),
            };
            stream
                .write_all(&frame_message(MessageType::Error, &error))
                .await
                .unwrap();
        });
        let result = SecureChannel::open(&transport, ChannelConfig::default()).await;
        assert!(matches!(
            result,
            Err(UaError::Service(s)) if s == StatusCode::BAD_TCP_ENDPOINT_URL_INVALID
        ));
    }

    #[tokio::test]
    async fn test_sign_and_encrypt_channel() {
        let (transport, listener) = MemoryTransport::pair(URL);
        let server = tokio::spawn(async move {
            let mut server = TestServer::accept(&listener).await;
            server.policy = SecurityPolicy::Basic256Sha256;
            server.encrypt = true;
            let (chunk, open) = server.answer_open(600_000).await;
            assert_eq!(open.security_mode, MessageSecurityMode::SignAndEncrypt);
            assert_eq!(open.client_nonce.len(), 32);
            match &chunk.security_header {
                SecurityHeader::Asymmetric(header) => {
                    assert_eq!(header.security_policy_uri, SecurityPolicy::Basic256Sha256.uri());
                    assert_eq!(header.receiver_certificate_thumbprint.len(), 20);
                }
                other => panic!("unexpected header {:?}", other),
            }
            server.answer_read(None, -7).await;
        });

        let config = ChannelConfig::default().with_security(
            SecurityPolicy::Basic256Sha256,
            MessageSecurityMode::SignAndEncrypt,
            Arc::new(PassThrough),
        );
        let channel = SecureChannel::open(&transport, config).await.unwrap();
        let response: ReadResponse = channel.call(read_request(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(read_value(response), -7);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_secured_policy_requires_asymmetric_security() {
        let (transport, _listener) = MemoryTransport::pair(URL);
        let config = ChannelConfig {
            security_policy: SecurityPolicy::Basic256Sha256,
            security_mode: MessageSecurityMode::Sign,
            ..Default::default()
        };
        assert!(matches!(
            SecureChannel::open(&transport, config).await,
            Err(UaError::Config(_))
        ));
        assert_eq!(transport.connection_attempts(), 0);
    }
}
