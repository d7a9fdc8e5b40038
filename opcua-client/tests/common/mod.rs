//! In-process OPC-UA server for client integration tests
//!
//! Speaks UA-TCP with security policy None over a [`MemoryTransport`] and
//! keeps just enough state (sessions, subscriptions, a tiny address space)
//! to drive the client through connection, publishing and recovery.

#![allow(dead_code)]

use opcua_channel::message::MESSAGE_HEADER_LEN;
use opcua_channel::{
    AcknowledgeMessage, AsymmetricSecurityHeader, ChunkPrefix, ChunkWriter, HelloMessage,
    MessageType, Protection, SecurityHeader, SendSequence, frame_message, open_chunk, read_chunk,
};
use opcua_client::{ClientConfig, ReconnectConfig};
use opcua_core::{
    BinaryEncodable, ByteString, DataValue, DateTime, ExpandedNodeId, NodeId, QualifiedName,
    StatusCode, UaResult, Variant,
};
use opcua_service::{
    ActivateSessionResponse, BrowsePathResult, BrowsePathTarget, ChannelSecurityToken,
    CloseSessionResponse, CreateMonitoredItemsResponse, CreateSessionResponse,
    CreateSubscriptionResponse, DataChangeNotification, DeleteMonitoredItemsResponse,
    DeleteSubscriptionsResponse, ModifyMonitoredItemsResponse, ModifySubscriptionResponse,
    MonitoredItemCreateResult, MonitoredItemModifyResult, MonitoredItemNotification,
    NotificationData, NotificationMessage, OpenSecureChannelResponse, PublishRequest, PublishResponse,
    ReadResponse, RepublishResponse, ResponseHeader, ServiceRequest, ServiceResponse,
    SetPublishingModeResponse, TransferResult, TransferSubscriptionsResponse,
    TranslateBrowsePathsToNodeIdsResponse, WriteResponse,
};
use opcua_transport::{MemoryListener, MemoryTransport};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub const URL: &str = "opc.tcp://memory:4840";

const SERVER_STATE: u32 = 2259;
const FLUSH_INTERVAL: Duration = Duration::from_millis(5);

/// Client configuration with short timeouts and a five-attempt budget
pub fn config() -> ClientConfig {
    ClientConfig::builder(URL)
        .session_name("integration")
        .request_timeout(Duration::from_secs(2))
        .keep_alive(Duration::from_secs(1), 1)
        .reconnect(ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            multiplier: 2.0,
            max_delay: Duration::from_millis(100),
            jitter: 0.0,
            max_attempts: Some(5),
        })
        .build()
        .unwrap()
}

#[derive(Debug, Default)]
struct MockSubscription {
    owner: u32,
    next_sequence_number: u32,
    /// monitored item id -> client handle
    items: HashMap<u32, u32>,
    queue: VecDeque<NotificationMessage>,
    retained: BTreeMap<u32, NotificationMessage>,
}

impl MockSubscription {
    fn take_sequence_number(&mut self) -> u32 {
        self.next_sequence_number += 1;
        self.next_sequence_number
    }
}

#[derive(Debug, Default)]
struct Model {
    /// authentication token -> session number
    sessions: HashMap<NodeId, u32>,
    next_session: u32,
    subscriptions: BTreeMap<u32, MockSubscription>,
    next_subscription_id: u32,
    next_item_id: u32,
    children: HashMap<(NodeId, QualifiedName), NodeId>,
    values: HashMap<NodeId, Variant>,
    read_only: HashSet<NodeId>,
    transfer_unsupported: bool,
    /// TransferSubscriptions requests go unanswered
    transfer_stalled: bool,
    requests: Vec<&'static str>,
}

#[derive(Default)]
struct Shared {
    model: Mutex<Model>,
    connections: Mutex<Vec<JoinHandle<()>>>,
    next_channel_id: AtomicU32,
}

impl Shared {
    fn model(&self) -> MutexGuard<'_, Model> {
        self.model.lock().unwrap()
    }
}

pub struct MockServer {
    transport: MemoryTransport,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept.abort();
        self.drop_connections();
    }
}

impl MockServer {
    /// Start accepting connections; must be called inside a runtime
    pub fn start() -> MockServer {
        let (transport, listener) = MemoryTransport::pair(URL);
        let shared = Arc::new(Shared::default());
        shared
            .model()
            .values
            .insert(NodeId::ns0(SERVER_STATE), Variant::Int32(0));
        let accept = tokio::spawn(accept_loop(Arc::clone(&shared), listener));
        MockServer {
            transport,
            shared,
            accept,
        }
    }

    /// Client side of the server's transport; clones share the refusal switch
    pub fn transport(&self) -> MemoryTransport {
        self.transport.clone()
    }

    pub fn add_child(&self, parent: &NodeId, browse_name: &str, node: NodeId, value: Variant) {
        let mut model = self.shared.model();
        model
            .children
            .insert((parent.clone(), QualifiedName::new(0, browse_name)), node.clone());
        model.values.insert(node, value);
    }

    pub fn set_value(&self, node: NodeId, value: Variant) {
        self.shared.model().values.insert(node, value);
    }

    pub fn set_read_only(&self, node: NodeId) {
        self.shared.model().read_only.insert(node);
    }

    pub fn value(&self, node: &NodeId) -> Option<Variant> {
        self.shared.model().values.get(node).cloned()
    }

    pub fn set_transfer_supported(&self, supported: bool) {
        self.shared.model().transfer_unsupported = !supported;
    }

    pub fn stall_transfers(&self, stalled: bool) {
        self.shared.model().transfer_stalled = stalled;
    }

    /// Queue a data change for `client_handle`, returning its sequence number
    pub fn push_data_change(&self, subscription_id: u32, client_handle: u32, value: Variant) -> u32 {
        let mut model = self.shared.model();
        let subscription = model
            .subscriptions
            .get_mut(&subscription_id)
            .expect("unknown subscription");
        assert!(
            subscription.items.values().any(|handle| *handle == client_handle),
            "no monitored item with client handle {}",
            client_handle
        );
        let sequence_number = subscription.take_sequence_number();
        let data = NotificationData::DataChange(DataChangeNotification {
            monitored_items: vec![MonitoredItemNotification {
                client_handle,
                value: DataValue::new(value),
            }],
            diagnostic_infos: Vec::new(),
        });
        subscription
            .queue
            .push_back(NotificationMessage::with_data(sequence_number, &[data]));
        sequence_number
    }

    /// Consume a sequence number without ever sending or retaining it
    pub fn lose_next_message(&self, subscription_id: u32) -> u32 {
        let mut model = self.shared.model();
        let subscription = model
            .subscriptions
            .get_mut(&subscription_id)
            .expect("unknown subscription");
        subscription.take_sequence_number()
    }

    /// Cut every open connection
    pub fn drop_connections(&self) {
        for handle in self.shared.connections.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    /// Forget all sessions, as after a server restart that kept subscriptions
    pub fn forget_sessions(&self) {
        self.shared.model().sessions.clear();
    }

    pub fn session_count(&self) -> usize {
        self.shared.model().sessions.len()
    }

    pub fn subscription_ids(&self) -> Vec<u32> {
        self.shared.model().subscriptions.keys().copied().collect()
    }

    /// How many requests named `name` (e.g. `"ReadRequest"`) were received
    pub fn request_count(&self, name: &str) -> usize {
        self.shared
            .model()
            .requests
            .iter()
            .filter(|request| **request == name)
            .count()
    }
}

async fn accept_loop(shared: Arc<Shared>, listener: MemoryListener) {
    while let Some(stream) = listener.accept().await {
        let handle = tokio::spawn(serve(Arc::clone(&shared), stream));
        shared.connections.lock().unwrap().push(handle);
    }
}

/// Aborts the wrapped task when dropped
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct PendingPublish {
    request_id: u32,
    request_handle: u32,
    session: u32,
    results: Vec<StatusCode>,
}

struct Connection {
    writer: WriteHalf<DuplexStream>,
    sequence: SendSequence,
    channel_id: u32,
    token_id: u32,
    publishes: VecDeque<PendingPublish>,
}

async fn serve(shared: Arc<Shared>, stream: DuplexStream) {
    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, mut chunks) = mpsc::unbounded_channel();
    // read_chunk is not cancel safe, so reading gets its own task
    let _reader = TaskGuard(tokio::spawn(async move {
        while let Ok(chunk) = read_chunk(&mut reader, 0).await {
            if tx.send(chunk).is_err() {
                break;
            }
        }
    }));

    let mut connection = Connection {
        writer,
        sequence: SendSequence::new(),
        channel_id: shared.next_channel_id.fetch_add(1, Ordering::SeqCst) + 1,
        token_id: 1,
        publishes: VecDeque::new(),
    };
    let mut flush = tokio::time::interval(FLUSH_INTERVAL);
    loop {
        tokio::select! {
            chunk = chunks.recv() => {
                let Some((header, raw)) = chunk else { break };
                let keep_going = match header.message_type {
                    MessageType::Hello => connection.acknowledge(&raw).await,
                    MessageType::CloseSecureChannel => false,
                    _ => connection.handle(&shared, raw).await,
                };
                if !keep_going {
                    break;
                }
            }
            _ = flush.tick() => {
                if connection.flush(&shared).await.is_err() {
                    break;
                }
            }
        }
    }
}

impl Connection {
    async fn acknowledge(&mut self, raw: &[u8]) -> bool {
        if HelloMessage::from_bytes(&raw[MESSAGE_HEADER_LEN..]).is_err() {
            return false;
        }
        let ack = AcknowledgeMessage {
            protocol_version: 0,
            receive_buffer_size: 65535,
            send_buffer_size: 65535,
            max_message_size: 0,
            max_chunk_count: 0,
        };
        self.writer
            .write_all(&frame_message(MessageType::Acknowledge, &ack))
            .await
            .is_ok()
    }

    async fn handle(&mut self, shared: &Shared, raw: Vec<u8>) -> bool {
        let Ok(prefix) = ChunkPrefix::parse(&raw) else {
            return false;
        };
        let Ok(chunk) = open_chunk(raw, prefix, Protection::None) else {
            return false;
        };
        let request_id = chunk.request_id();
        let Ok(request) = ServiceRequest::from_bytes(&chunk.body) else {
            return false;
        };
        let stalled = {
            let mut model = shared.model();
            model.requests.push(request.name());
            model.transfer_stalled && matches!(request, ServiceRequest::TransferSubscriptionsRequest(_))
        };
        if stalled {
            return true;
        }

        let (message_type, response) = match request {
            ServiceRequest::OpenSecureChannelRequest(open) => {
                let response = ServiceResponse::from(OpenSecureChannelResponse {
                    response_header: ResponseHeader::new(open.request_header.request_handle, StatusCode::GOOD),
                    server_protocol_version: 0,
                    security_token: ChannelSecurityToken {
                        channel_id: self.channel_id,
                        token_id: self.token_id,
                        created_at: DateTime::now(),
                        revised_lifetime: open.requested_lifetime,
                    },
                    server_nonce: ByteString::null(),
                });
                (MessageType::OpenSecureChannel, response)
            }
            ServiceRequest::PublishRequest(publish) => {
                let handle = publish.request_header.request_handle;
                match acknowledge_publish(&mut shared.model(), &publish) {
                    Some((session, results)) => {
                        self.publishes.push_back(PendingPublish {
                            request_id,
                            request_handle: handle,
                            session,
                            results,
                        });
                        return true;
                    }
                    None => (
                        MessageType::Message,
                        ServiceResponse::fault(handle, StatusCode::BAD_SESSION_ID_INVALID),
                    ),
                }
            }
            other => (MessageType::Message, dispatch(&mut shared.model(), other)),
        };
        self.send(message_type, request_id, &response).await.is_ok()
    }

    /// Answer held publish requests with queued notifications
    async fn flush(&mut self, shared: &Shared) -> UaResult<()> {
        let mut ready = Vec::new();
        {
            let mut model = shared.model();
            while let Some(pending) = self.publishes.front() {
                let session = pending.session;
                let Some((&id, subscription)) = model
                    .subscriptions
                    .iter_mut()
                    .find(|(_, s)| s.owner == session && !s.queue.is_empty())
                else {
                    break;
                };
                let Some(pending) = self.publishes.pop_front() else { break };
                let Some(message) = subscription.queue.pop_front() else { break };
                subscription
                    .retained
                    .insert(message.sequence_number, message.clone());
                let response = ServiceResponse::from(PublishResponse {
                    response_header: ResponseHeader::new(pending.request_handle, StatusCode::GOOD),
                    subscription_id: id,
                    available_sequence_numbers: subscription.retained.keys().copied().collect(),
                    more_notifications: !subscription.queue.is_empty(),
                    notification_message: message,
                    results: pending.results,
                    diagnostic_infos: Vec::new(),
                });
                ready.push((pending.request_id, response));
            }
        }
        for (request_id, response) in ready {
            self.send(MessageType::Message, request_id, &response).await?;
        }
        Ok(())
    }

    async fn send(&mut self, message_type: MessageType, request_id: u32, response: &ServiceResponse) -> UaResult<()> {
        let security_header = match message_type {
            MessageType::OpenSecureChannel => SecurityHeader::Asymmetric(AsymmetricSecurityHeader::none()),
            _ => SecurityHeader::Symmetric {
                token_id: self.token_id,
            },
        };
        let writer = ChunkWriter {
            message_type,
            secure_channel_id: self.channel_id,
            security_header,
            protection: Protection::None,
            max_chunk_size: 65535,
            max_chunk_count: 0,
            max_message_size: 0,
        };
        for chunk in writer.write(request_id, &response.to_bytes(), &mut self.sequence)? {
            self.writer.write_all(&chunk).await?;
        }
        Ok(())
    }
}

/// Owning session of a publish request and the results of its acknowledgements
fn acknowledge_publish(model: &mut Model, publish: &PublishRequest) -> Option<(u32, Vec<StatusCode>)> {
    let session = model
        .sessions
        .get(&publish.request_header.authentication_token)
        .copied()?;
    let results = publish
        .subscription_acknowledgements
        .iter()
        .map(|ack| match model.subscriptions.get_mut(&ack.subscription_id) {
            Some(subscription) => {
                if subscription.retained.remove(&ack.sequence_number).is_some() {
                    StatusCode::GOOD
                } else {
                    StatusCode::BAD_SEQUENCE_NUMBER_UNKNOWN
                }
            }
            None => StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
        })
        .collect();
    Some((session, results))
}

fn header(request: &ServiceRequest) -> ResponseHeader {
    ResponseHeader::new(request.request_header().request_handle, StatusCode::GOOD)
}

fn dispatch(model: &mut Model, request: ServiceRequest) -> ServiceResponse {
    let handle = request.request_header().request_handle;
    let response_header = header(&request);
    if let ServiceRequest::CreateSessionRequest(create) = &request {
        model.next_session += 1;
        let n = model.next_session;
        let token = NodeId::numeric(1, 1_000_000 + n);
        model.sessions.insert(token.clone(), n);
        return ServiceResponse::from(CreateSessionResponse {
            response_header,
            session_id: NodeId::numeric(1, n),
            authentication_token: token,
            revised_session_timeout: create.requested_session_timeout,
            ..Default::default()
        });
    }
    let Some(session) = model
        .sessions
        .get(&request.request_header().authentication_token)
        .copied()
    else {
        return ServiceResponse::fault(handle, StatusCode::BAD_SESSION_ID_INVALID);
    };

    match request {
        ServiceRequest::ActivateSessionRequest(_) => ServiceResponse::from(ActivateSessionResponse {
            response_header,
            ..Default::default()
        }),
        ServiceRequest::CloseSessionRequest(close) => {
            model.sessions.retain(|_, n| *n != session);
            if close.delete_subscriptions {
                model.subscriptions.retain(|_, s| s.owner != session);
            }
            ServiceResponse::from(CloseSessionResponse { response_header })
        }
        ServiceRequest::ReadRequest(read) => {
            let results = read
                .nodes_to_read
                .iter()
                .map(|node| match model.values.get(&node.node_id) {
                    Some(value) => DataValue::new(value.clone()),
                    None => DataValue::from_status(StatusCode::BAD_NODE_ID_UNKNOWN),
                })
                .collect();
            ServiceResponse::from(ReadResponse {
                response_header,
                results,
                diagnostic_infos: Vec::new(),
            })
        }
        ServiceRequest::WriteRequest(write) => {
            let results = write
                .nodes_to_write
                .into_iter()
                .map(|node| {
                    if model.read_only.contains(&node.node_id) {
                        StatusCode::BAD_NOT_WRITABLE
                    } else if !model.values.contains_key(&node.node_id) {
                        StatusCode::BAD_NODE_ID_UNKNOWN
                    } else {
                        model.values.insert(node.node_id, node.value.value().clone());
                        StatusCode::GOOD
                    }
                })
                .collect();
            ServiceResponse::from(WriteResponse {
                response_header,
                results,
                diagnostic_infos: Vec::new(),
            })
        }
        ServiceRequest::TranslateBrowsePathsToNodeIdsRequest(translate) => {
            let results = translate
                .browse_paths
                .iter()
                .map(|path| {
                    let target = path
                        .relative_path
                        .elements
                        .first()
                        .and_then(|element| {
                            model
                                .children
                                .get(&(path.starting_node.clone(), element.target_name.clone()))
                        });
                    match target {
                        Some(node) => BrowsePathResult {
                            status_code: StatusCode::GOOD,
                            targets: vec![BrowsePathTarget {
                                target_id: ExpandedNodeId::from(node.clone()),
                                remaining_path_index: u32::MAX,
                            }],
                        },
                        None => BrowsePathResult {
                            status_code: StatusCode::BAD_NO_MATCH,
                            targets: Vec::new(),
                        },
                    }
                })
                .collect();
            ServiceResponse::from(TranslateBrowsePathsToNodeIdsResponse {
                response_header,
                results,
                diagnostic_infos: Vec::new(),
            })
        }
        ServiceRequest::CreateSubscriptionRequest(create) => {
            model.next_subscription_id += 1;
            let id = model.next_subscription_id;
            model.subscriptions.insert(
                id,
                MockSubscription {
                    owner: session,
                    ..Default::default()
                },
            );
            ServiceResponse::from(CreateSubscriptionResponse {
                response_header,
                subscription_id: id,
                revised_publishing_interval: create.requested_publishing_interval,
                revised_lifetime_count: create.requested_lifetime_count,
                revised_max_keep_alive_count: create.requested_max_keep_alive_count,
            })
        }
        ServiceRequest::ModifySubscriptionRequest(modify) => {
            if !model.subscriptions.contains_key(&modify.subscription_id) {
                return ServiceResponse::fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
            }
            ServiceResponse::from(ModifySubscriptionResponse {
                response_header,
                revised_publishing_interval: modify.requested_publishing_interval,
                revised_lifetime_count: modify.requested_lifetime_count,
                revised_max_keep_alive_count: modify.requested_max_keep_alive_count,
            })
        }
        ServiceRequest::SetPublishingModeRequest(mode) => ServiceResponse::from(SetPublishingModeResponse {
            response_header,
            results: subscription_results(model, &mode.subscription_ids),
            diagnostic_infos: Vec::new(),
        }),
        ServiceRequest::DeleteSubscriptionsRequest(delete) => {
            let results = subscription_results(model, &delete.subscription_ids);
            for id in &delete.subscription_ids {
                model.subscriptions.remove(id);
            }
            ServiceResponse::from(DeleteSubscriptionsResponse {
                response_header,
                results,
                diagnostic_infos: Vec::new(),
            })
        }
        ServiceRequest::TransferSubscriptionsRequest(transfer) => {
            if model.transfer_unsupported {
                return ServiceResponse::fault(handle, StatusCode::BAD_SERVICE_UNSUPPORTED);
            }
            let results = transfer
                .subscription_ids
                .iter()
                .map(|id| match model.subscriptions.get_mut(id) {
                    Some(subscription) => {
                        subscription.owner = session;
                        TransferResult {
                            status_code: StatusCode::GOOD,
                            available_sequence_numbers: subscription.retained.keys().copied().collect(),
                        }
                    }
                    None => TransferResult {
                        status_code: StatusCode::BAD_SUBSCRIPTION_ID_INVALID,
                        available_sequence_numbers: Vec::new(),
                    },
                })
                .collect();
            ServiceResponse::from(TransferSubscriptionsResponse {
                response_header,
                results,
                diagnostic_infos: Vec::new(),
            })
        }
        ServiceRequest::RepublishRequest(republish) => {
            let message = model
                .subscriptions
                .get(&republish.subscription_id)
                .and_then(|s| s.retained.get(&republish.retransmit_sequence_number));
            match message {
                Some(message) => ServiceResponse::from(RepublishResponse {
                    response_header,
                    notification_message: message.clone(),
                }),
                None => ServiceResponse::fault(handle, StatusCode::BAD_MESSAGE_NOT_AVAILABLE),
            }
        }
        ServiceRequest::CreateMonitoredItemsRequest(create) => {
            if !model.subscriptions.contains_key(&create.subscription_id) {
                return ServiceResponse::fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID);
            }
            let mut results = Vec::new();
            for item in &create.items_to_create {
                model.next_item_id += 1;
                let item_id = model.next_item_id;
                if let Some(subscription) = model.subscriptions.get_mut(&create.subscription_id) {
                    subscription
                        .items
                        .insert(item_id, item.requested_parameters.client_handle);
                }
                results.push(MonitoredItemCreateResult {
                    status_code: StatusCode::GOOD,
                    monitored_item_id: item_id,
                    revised_sampling_interval: item.requested_parameters.sampling_interval.max(0.0),
                    revised_queue_size: item.requested_parameters.queue_size.max(1),
                    ..Default::default()
                });
            }
            ServiceResponse::from(CreateMonitoredItemsResponse {
                response_header,
                results,
                diagnostic_infos: Vec::new(),
            })
        }
        ServiceRequest::ModifyMonitoredItemsRequest(modify) => {
            let results = modify
                .items_to_modify
                .iter()
                .map(|item| MonitoredItemModifyResult {
                    status_code: StatusCode::GOOD,
                    revised_sampling_interval: item.requested_parameters.sampling_interval.max(0.0),
                    revised_queue_size: item.requested_parameters.queue_size.max(1),
                    ..Default::default()
                })
                .collect();
            ServiceResponse::from(ModifyMonitoredItemsResponse {
                response_header,
                results,
                diagnostic_infos: Vec::new(),
            })
        }
        ServiceRequest::DeleteMonitoredItemsRequest(delete) => {
            let subscription = model.subscriptions.get_mut(&delete.subscription_id);
            let results = match subscription {
                Some(subscription) => delete
                    .monitored_item_ids
                    .iter()
                    .map(|id| match subscription.items.remove(id) {
                        Some(_) => StatusCode::GOOD,
                        None => StatusCode::BAD_MONITORED_ITEM_ID_INVALID,
                    })
                    .collect(),
                None => return ServiceResponse::fault(handle, StatusCode::BAD_SUBSCRIPTION_ID_INVALID),
            };
            ServiceResponse::from(DeleteMonitoredItemsResponse {
                response_header,
                results,
                diagnostic_infos: Vec::new(),
            })
        }
        _ => ServiceResponse::fault(handle, StatusCode::BAD_SERVICE_UNSUPPORTED),
    }
}

fn subscription_results(model: &Model, ids: &[u32]) -> Vec<StatusCode> {
    ids.iter()
        .map(|id| {
            if model.subscriptions.contains_key(id) {
                StatusCode::GOOD
            } else {
                StatusCode::BAD_SUBSCRIPTION_ID_INVALID
            }
        })
        .collect()
}
