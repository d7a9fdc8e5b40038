use super::monitored_item::{CreatedItem, ItemModification, MonitoredItem, MonitoredItemHandler, MonitoredItemRequest};
use super::sequence::{Delivery, Received, SequenceTracker, distance};
use super::state::SubscriptionState;
use super::{RevisedParameters, Subscription, SubscriptionListener, SubscriptionSettings};
use crate::config::PublishSettings;
use crate::invoker::ServiceInvoker;
use futures::stream::{FuturesUnordered, StreamExt};
use opcua_core::{DataValue, ErrorClass, StatusCode, UaError, UaResult, Variant};
use opcua_service::{
    CreateMonitoredItemsRequest, CreateMonitoredItemsResponse, CreateSubscriptionResponse,
    DeleteMonitoredItemsRequest, DeleteMonitoredItemsResponse, DeleteSubscriptionsRequest,
    DeleteSubscriptionsResponse, ModifyMonitoredItemsRequest, ModifyMonitoredItemsResponse,
    ModifySubscriptionResponse, MonitoredItemModifyRequest, MonitoringParameters,
    NotificationData, NotificationMessage, PublishRequest, PublishResponse, RepublishRequest,
    RepublishResponse, RequestHeader, ServiceRequest, ServiceResponseType,
    SetPublishingModeRequest, SetPublishingModeResponse, SubscriptionAcknowledgement,
    TimestampsToReturn, TransferSubscriptionsRequest, TransferSubscriptionsResponse,
};
use std::collections::BTreeMap;
use std::future::Future;
use std::ops::RangeInclusive;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Pause after a publish failure that is not a timeout or connection loss
const PUBLISH_RETRY_DELAY: Duration = Duration::from_millis(500);

type PublishFuture = Pin<Box<dyn Future<Output = PublishOutcome> + Send>>;

struct PublishOutcome {
    epoch: u64,
    acknowledgements: Vec<SubscriptionAcknowledgement>,
    result: UaResult<PublishResponse>,
}

/// Work produced under the lock and run after releasing it
enum Dispatch {
    DataChange(Arc<dyn MonitoredItemHandler>, u32, DataValue),
    Event(Arc<dyn MonitoredItemHandler>, u32, Vec<Variant>),
    Status(StatusCode),
    Lost(RangeInclusive<u32>),
}

#[derive(Default)]
struct EngineState {
    subscriptions: BTreeMap<u32, Subscription>,
    acknowledgements: Vec<SubscriptionAcknowledgement>,
    outstanding: usize,
    suspended: bool,
    no_subscription: bool,
    pool_limit: Option<usize>,
    retry_at: Option<Instant>,
    /// Bumped on resume; connection errors of older requests are stale
    epoch: u64,
}

impl EngineState {
    fn publish_target(&self, max_pending: usize) -> usize {
        if self.suspended || self.no_subscription || self.retry_at.is_some() {
            return 0;
        }
        let target = (2 * self.subscriptions.len()).min(max_pending);
        match self.pool_limit {
            Some(limit) => target.min(limit),
            None => target,
        }
    }

    fn update_late(&mut self, threshold: usize) {
        let late = self.suspended || self.outstanding < threshold;
        for subscription in self.subscriptions.values_mut() {
            match (subscription.state, late) {
                (SubscriptionState::Created | SubscriptionState::Normal, true) => {
                    subscription.transition(SubscriptionState::Late)
                }
                (SubscriptionState::Late, false) => subscription.transition(SubscriptionState::Normal),
                _ => {}
            }
        }
    }

    fn take_acknowledgements(&mut self) -> Vec<SubscriptionAcknowledgement> {
        let subscriptions = &self.subscriptions;
        let mut acks = std::mem::take(&mut self.acknowledgements);
        acks.retain(|ack| subscriptions.contains_key(&ack.subscription_id));
        acks
    }

    /// Smallest keep-alive period among the subscriptions
    fn min_keep_alive(&self) -> Option<Duration> {
        self.subscriptions
            .values()
            .map(|s| s.revised.keep_alive_period())
            .filter(|period| !period.is_zero())
            .min()
    }

    /// Earliest watchdog deadline; none while publishing is suspended
    fn watchdog_at(&self, multiplier: f64) -> Option<Instant> {
        if self.suspended {
            return None;
        }
        self.subscriptions
            .values()
            .filter_map(|s| s.watchdog_deadline(multiplier))
            .min()
    }

    fn listeners(&self) -> Vec<(u32, Arc<dyn SubscriptionListener>)> {
        self.subscriptions
            .values()
            .filter_map(|s| s.listener.as_ref().map(|l| (s.id, Arc::clone(l))))
            .collect()
    }
}

struct Inner {
    invoker: Arc<dyn ServiceInvoker>,
    settings: PublishSettings,
    request_timeout: Duration,
    state: Mutex<EngineState>,
    wake: Notify,
    next_client_handle: AtomicU32,
    engine: Mutex<Option<JoinHandle<()>>>,
}

/// Owns the subscriptions of a client and runs the publish cycle
///
/// The publish engine is a single task started with the first
/// subscription. It keeps `min(2 × subscriptions, max_pending)` Publish
/// requests outstanding and processes their responses one at a time.
pub struct SubscriptionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("SubscriptionManager")
            .field("subscriptions", &state.subscriptions.len())
            .field("outstanding", &state.outstanding)
            .field("suspended", &state.suspended)
            .finish()
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl SubscriptionManager {
    pub fn new(invoker: Arc<dyn ServiceInvoker>, settings: PublishSettings, request_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                invoker,
                settings,
                request_timeout,
                state: Mutex::new(EngineState::default()),
                wake: Notify::new(),
                next_client_handle: AtomicU32::new(1),
                engine: Mutex::new(None),
            }),
        }
    }

    /// Create a subscription; publishing starts immediately
    pub async fn create_subscription(
        &self,
        settings: SubscriptionSettings,
        listener: Option<Arc<dyn SubscriptionListener>>,
    ) -> UaResult<u32> {
        let response: CreateSubscriptionResponse = self.inner.call(settings.create_request()).await?;
        let id = response.subscription_id;
        let revised = RevisedParameters::from(&response);
        log::info!(
            "Created subscription {} (publishing interval {:?}, keep-alive count {})",
            id,
            revised.publishing_interval,
            revised.max_keep_alive_count
        );
        {
            let mut state = self.inner.lock();
            state
                .subscriptions
                .insert(id, Subscription::new(id, settings, revised, listener));
            state.no_subscription = false;
        }
        self.start_engine();
        self.inner.wake.notify_one();
        Ok(id)
    }

    pub async fn modify_subscription(&self, id: u32, settings: SubscriptionSettings) -> UaResult<RevisedParameters> {
        self.inner.ensure_subscription(id)?;
        let response: ModifySubscriptionResponse = self.inner.call(settings.modify_request(id)).await?;
        let revised = RevisedParameters::new(
            response.revised_publishing_interval,
            response.revised_lifetime_count,
            response.revised_max_keep_alive_count,
        );
        let mut state = self.inner.lock();
        if let Some(subscription) = state.subscriptions.get_mut(&id) {
            subscription.settings = settings;
            subscription.revised = revised;
        }
        Ok(revised)
    }

    pub async fn set_publishing_mode(&self, id: u32, enabled: bool) -> UaResult<()> {
        self.inner.ensure_subscription(id)?;
        let request = SetPublishingModeRequest {
            request_header: RequestHeader::default(),
            publishing_enabled: enabled,
            subscription_ids: vec![id],
        };
        let response: SetPublishingModeResponse = self.inner.call(request).await?;
        let status = single_result(&response.results)?;
        if status.is_bad() {
            return Err(UaError::Service(status));
        }
        if let Some(subscription) = self.inner.lock().subscriptions.get_mut(&id) {
            subscription.settings.publishing_enabled = enabled;
        }
        Ok(())
    }

    /// Delete a subscription on the server and forget it locally
    pub async fn delete_subscription(&self, id: u32) -> UaResult<()> {
        let removed = {
            let mut state = self.inner.lock();
            let removed = state.subscriptions.remove(&id);
            state.acknowledgements.retain(|ack| ack.subscription_id != id);
            removed
        };
        let Some(mut subscription) = removed else {
            return Err(UaError::Service(StatusCode::BAD_SUBSCRIPTION_ID_INVALID));
        };
        subscription.transition(SubscriptionState::Closed);
        log::info!("Deleting subscription {}", id);
        let request = DeleteSubscriptionsRequest {
            request_header: RequestHeader::default(),
            subscription_ids: vec![id],
        };
        let response: DeleteSubscriptionsResponse = self.inner.call(request).await?;
        match single_result(&response.results)? {
            status if status.is_good() || status == StatusCode::BAD_SUBSCRIPTION_ID_INVALID => Ok(()),
            status => Err(UaError::Service(status)),
        }
    }

    /// Create monitored items on subscription `id`
    ///
    /// Client handles are assigned here and returned in request order.
    /// Items the server rejects are not retained.
    pub async fn create_monitored_items(
        &self,
        id: u32,
        requests: Vec<MonitoredItemRequest>,
    ) -> UaResult<Vec<CreatedItem>> {
        if requests.is_empty() {
            return Err(UaError::InvalidArgument("no monitored items to create".to_string()));
        }
        let items: Vec<MonitoredItem> = requests
            .into_iter()
            .map(|request| MonitoredItem::new(self.inner.next_client_handle(), request))
            .collect();
        let handles: Vec<u32> = items.iter().map(MonitoredItem::client_handle).collect();
        let wire = items.iter().map(MonitoredItem::create_request).collect();
        {
            // Registered before the call so early notifications are routed
            let mut state = self.inner.lock();
            let subscription = state
                .subscriptions
                .get_mut(&id)
                .ok_or(UaError::Service(StatusCode::BAD_SUBSCRIPTION_ID_INVALID))?;
            for item in items {
                subscription.items.insert(item.client_handle(), item);
            }
        }

        let request = CreateMonitoredItemsRequest {
            request_header: RequestHeader::default(),
            subscription_id: id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_create: wire,
        };
        let result = self
            .inner
            .call::<CreateMonitoredItemsResponse>(request)
            .await
            .and_then(|response| {
                if response.results.len() == handles.len() {
                    Ok(response)
                } else {
                    Err(UaError::Protocol(format!(
                        "{} results for {} monitored items",
                        response.results.len(),
                        handles.len()
                    )))
                }
            });

        let mut state = self.inner.lock();
        let Some(subscription) = state.subscriptions.get_mut(&id) else {
            return Err(result
                .err()
                .unwrap_or(UaError::Service(StatusCode::BAD_SUBSCRIPTION_ID_INVALID)));
        };
        let response = match result {
            Ok(response) => response,
            Err(e) => {
                for handle in &handles {
                    subscription.items.remove(handle);
                }
                return Err(e);
            }
        };

        let mut created = Vec::with_capacity(handles.len());
        for (handle, result) in handles.iter().zip(&response.results) {
            if result.status_code.is_good() {
                if let Some(item) = subscription.items.get_mut(handle) {
                    item.learn(
                        result.monitored_item_id,
                        result.revised_sampling_interval,
                        result.revised_queue_size,
                    );
                }
            } else {
                log::warn!(
                    "Server rejected monitored item {} on subscription {}: {}",
                    handle,
                    id,
                    result.status_code
                );
                subscription.items.remove(handle);
            }
            created.push(CreatedItem {
                client_handle: *handle,
                status: result.status_code,
                monitored_item_id: result.monitored_item_id,
                revised_sampling_interval: result.revised_sampling_interval,
                revised_queue_size: result.revised_queue_size,
            });
        }
        Ok(created)
    }

    /// Change sampling parameters of items identified by client handle
    pub async fn modify_monitored_items(
        &self,
        id: u32,
        modifications: Vec<ItemModification>,
    ) -> UaResult<Vec<StatusCode>> {
        let items_to_modify = {
            let state = self.inner.lock();
            let subscription = state
                .subscriptions
                .get(&id)
                .ok_or(UaError::Service(StatusCode::BAD_SUBSCRIPTION_ID_INVALID))?;
            modifications
                .iter()
                .map(|m| {
                    let item = subscription.items.get(&m.client_handle).ok_or_else(|| {
                        UaError::InvalidArgument(format!("unknown client handle {}", m.client_handle))
                    })?;
                    Ok(MonitoredItemModifyRequest {
                        monitored_item_id: item.monitored_item_id(),
                        requested_parameters: MonitoringParameters {
                            client_handle: m.client_handle,
                            sampling_interval: m.sampling_interval,
                            filter: m.filter.clone(),
                            queue_size: m.queue_size,
                            discard_oldest: m.discard_oldest,
                        },
                    })
                })
                .collect::<UaResult<Vec<_>>>()?
        };
        let request = ModifyMonitoredItemsRequest {
            request_header: RequestHeader::default(),
            subscription_id: id,
            timestamps_to_return: TimestampsToReturn::Both,
            items_to_modify,
        };
        let response: ModifyMonitoredItemsResponse = self.inner.call(request).await?;

        let mut state = self.inner.lock();
        if let Some(subscription) = state.subscriptions.get_mut(&id) {
            for (m, result) in modifications.iter().zip(&response.results) {
                if result.status_code.is_good() {
                    if let Some(item) = subscription.items.get_mut(&m.client_handle) {
                        item.apply(m, result.revised_sampling_interval, result.revised_queue_size);
                    }
                }
            }
        }
        Ok(response.results.iter().map(|r| r.status_code).collect())
    }

    /// Delete items identified by client handle
    pub async fn delete_monitored_items(&self, id: u32, client_handles: &[u32]) -> UaResult<Vec<StatusCode>> {
        let monitored_item_ids = {
            let mut state = self.inner.lock();
            let subscription = state
                .subscriptions
                .get_mut(&id)
                .ok_or(UaError::Service(StatusCode::BAD_SUBSCRIPTION_ID_INVALID))?;
            if let Some(unknown) = client_handles.iter().find(|h| !subscription.items.contains_key(h)) {
                return Err(UaError::InvalidArgument(format!("unknown client handle {}", unknown)));
            }
            client_handles
                .iter()
                .filter_map(|handle| subscription.items.remove(handle))
                .map(|item| item.monitored_item_id())
                .collect::<Vec<_>>()
        };
        let request = DeleteMonitoredItemsRequest {
            request_header: RequestHeader::default(),
            subscription_id: id,
            monitored_item_ids,
        };
        let response: DeleteMonitoredItemsResponse = self.inner.call(request).await?;
        Ok(response.results)
    }

    /// Snapshot of one subscription
    pub fn subscription(&self, id: u32) -> Option<Subscription> {
        self.inner.lock().subscriptions.get(&id).cloned()
    }

    pub fn subscription_ids(&self) -> Vec<u32> {
        self.inner.lock().subscriptions.keys().copied().collect()
    }

    pub fn subscription_state(&self, id: u32) -> Option<SubscriptionState> {
        self.inner.lock().subscriptions.get(&id).map(Subscription::state)
    }

    /// Publish requests currently awaiting a response
    pub fn outstanding_publish_requests(&self) -> usize {
        self.inner.lock().outstanding
    }

    /// Stop publishing after the connection was lost
    pub fn suspend(&self) {
        let listeners = {
            let mut state = self.inner.lock();
            if state.suspended {
                return;
            }
            state.suspended = true;
            state.update_late(self.inner.settings.late_publish_threshold);
            state.listeners()
        };
        log::info!("Publishing suspended");
        for (id, listener) in listeners {
            listener.on_communication_lost(id);
        }
        self.inner.wake.notify_one();
    }

    /// Restart publishing on the restored connection
    pub fn resume(&self) {
        {
            let mut state = self.inner.lock();
            state.suspended = false;
            state.epoch += 1;
            state.pool_limit = None;
            state.retry_at = None;
            let now = Instant::now();
            for subscription in state.subscriptions.values_mut() {
                subscription.touch(now);
            }
        }
        log::info!("Publishing resumed");
        self.inner.wake.notify_one();
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.lock().suspended
    }

    /// Move every subscription to the current session
    ///
    /// Subscriptions the server refuses to transfer, or all of them when it
    /// does not support TransferSubscriptions, are recreated from their
    /// retained definitions. Requests go through `invoker`, the session
    /// being restored, before it is published to other callers. Transferred
    /// subscriptions fetch the retained messages they have not delivered.
    pub async fn transfer_subscriptions(&self, invoker: &dyn ServiceInvoker) -> UaResult<()> {
        let ids = self.subscription_ids();
        if ids.is_empty() {
            return Ok(());
        }
        let request = TransferSubscriptionsRequest {
            request_header: RequestHeader::default(),
            subscription_ids: ids.clone(),
            send_initial_values: true,
        };
        let mut transferred: Vec<(u32, Vec<u32>)> = Vec::new();
        let mut refused: Vec<(u32, StatusCode)> = Vec::new();
        match self.inner.call_via::<TransferSubscriptionsResponse>(invoker, request).await {
            Ok(response) => {
                let mut results = response.results.into_iter();
                for id in &ids {
                    match results.next() {
                        Some(result) if result.status_code.is_good() => {
                            transferred.push((*id, result.available_sequence_numbers))
                        }
                        Some(result) => refused.push((*id, result.status_code)),
                        None => refused.push((*id, StatusCode::BAD_UNEXPECTED_ERROR)),
                    }
                }
            }
            Err(UaError::Service(status)) if status.is_unsupported() => {
                refused = ids.iter().map(|id| (*id, status)).collect();
            }
            Err(e) => return Err(e),
        }
        log::info!(
            "Transferred {} of {} subscriptions",
            ids.len() - refused.len(),
            ids.len()
        );

        for (id, status) in refused {
            if let Some(listener) = self.inner.listener(id) {
                listener.on_transfer_failed(id, status);
            }
            self.recreate(invoker, id).await?;
        }
        for (id, available) in transferred {
            self.inner.catch_up(invoker, id, &available).await;
        }
        Ok(())
    }

    /// Recreate every subscription from its retained definition
    pub async fn recreate_subscriptions(&self, invoker: &dyn ServiceInvoker) -> UaResult<()> {
        for id in self.subscription_ids() {
            self.recreate(invoker, id).await?;
        }
        Ok(())
    }

    async fn recreate(&self, invoker: &dyn ServiceInvoker, old_id: u32) -> UaResult<()> {
        let Some(existing) = self.subscription(old_id) else {
            return Ok(());
        };
        let response: CreateSubscriptionResponse =
            match self.inner.call_via(invoker, existing.settings.create_request()).await {
            Ok(response) => response,
            Err(UaError::Service(status)) => {
                log::error!("Could not recreate subscription {}: {}", old_id, status);
                self.inner.close(old_id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let new_id = response.subscription_id;

        let items: Vec<MonitoredItem> = existing.items.values().cloned().collect();
        let results = if items.is_empty() {
            Vec::new()
        } else {
            let request = CreateMonitoredItemsRequest {
                request_header: RequestHeader::default(),
                subscription_id: new_id,
                timestamps_to_return: TimestampsToReturn::Both,
                items_to_create: items.iter().map(MonitoredItem::create_request).collect(),
            };
            self.inner
                .call_via::<CreateMonitoredItemsResponse>(invoker, request)
                .await?
                .results
        };

        let listener = {
            let mut state = self.inner.lock();
            let Some(mut subscription) = state.subscriptions.remove(&old_id) else {
                return Ok(());
            };
            state.acknowledgements.retain(|ack| ack.subscription_id != old_id);
            let mut recreated = Subscription::new(
                new_id,
                subscription.settings.clone(),
                RevisedParameters::from(&response),
                subscription.listener.take(),
            );
            for (i, item) in items.into_iter().enumerate() {
                let handle = item.client_handle();
                // Keep the current definition if the item was modified meanwhile
                let Some(mut item) = subscription.items.remove(&handle) else {
                    continue;
                };
                match results.get(i) {
                    Some(result) if result.status_code.is_good() => {
                        item.learn(
                            result.monitored_item_id,
                            result.revised_sampling_interval,
                            result.revised_queue_size,
                        );
                        recreated.items.insert(handle, item);
                    }
                    Some(result) => log::warn!(
                        "Monitored item {} not recreated on subscription {}: {}",
                        handle,
                        new_id,
                        result.status_code
                    ),
                    None => log::warn!("Monitored item {} missing from recreation results", handle),
                }
            }
            let listener = recreated.listener.clone();
            state.subscriptions.insert(new_id, recreated);
            state.no_subscription = false;
            listener
        };
        log::info!("Recreated subscription {} as {}", old_id, new_id);
        if let Some(listener) = listener {
            listener.on_resubscribed(old_id, new_id);
        }
        self.inner.wake.notify_one();
        Ok(())
    }

    fn start_engine(&self) {
        let mut engine = self.inner.engine.lock().unwrap_or_else(PoisonError::into_inner);
        if engine.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *engine = Some(tokio::spawn(run_engine(inner)));
    }

    /// Stop the publish engine; subscriptions stay on the server
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .inner
            .engine
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn single_result(results: &[StatusCode]) -> UaResult<StatusCode> {
    results
        .first()
        .copied()
        .ok_or_else(|| UaError::Protocol("empty result list".to_string()))
}

fn is_connection_error(error: &UaError) -> bool {
    matches!(error.class(), ErrorClass::Transport | ErrorClass::Session)
}

/// Missing numbers worth a Republish; without hints every one is tried
fn retain_available(tracker: &mut SequenceTracker, missing: Vec<u32>, available: &[u32]) -> Vec<u32> {
    if available.is_empty() {
        return missing;
    }
    let (retained, gone): (Vec<u32>, Vec<u32>) = missing.into_iter().partition(|n| available.contains(n));
    for n in gone {
        tracker.mark_lost(n);
    }
    retained
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_client_handle(&self) -> u32 {
        self.next_client_handle.fetch_add(1, Ordering::Relaxed)
    }

    async fn call<T: ServiceResponseType>(&self, request: impl Into<ServiceRequest>) -> UaResult<T> {
        self.call_via(self.invoker.as_ref(), request).await
    }

    async fn call_via<T: ServiceResponseType>(
        &self,
        invoker: &dyn ServiceInvoker,
        request: impl Into<ServiceRequest>,
    ) -> UaResult<T> {
        invoker.invoke(request.into(), self.request_timeout).await?.into_typed()
    }

    fn ensure_subscription(&self, id: u32) -> UaResult<()> {
        if self.lock().subscriptions.contains_key(&id) {
            Ok(())
        } else {
            Err(UaError::Service(StatusCode::BAD_SUBSCRIPTION_ID_INVALID))
        }
    }

    fn listener(&self, id: u32) -> Option<Arc<dyn SubscriptionListener>> {
        self.lock().subscriptions.get(&id).and_then(|s| s.listener.clone())
    }

    fn close(&self, id: u32) {
        let mut state = self.lock();
        if let Some(mut subscription) = state.subscriptions.remove(&id) {
            subscription.transition(SubscriptionState::Closed);
        }
        state.acknowledgements.retain(|ack| ack.subscription_id != id);
    }

    /// Publish timeout: the pool must outlast the server's keep-alive
    fn publish_timeout(&self, state: &EngineState, pending: usize) -> Duration {
        match state.min_keep_alive() {
            Some(keep_alive) => keep_alive.mul_f64(pending.max(1) as f64 * 1.25),
            None => self.request_timeout,
        }
    }

    /// Top up the pool of outstanding Publish requests
    fn replenish(&self, in_flight: &mut FuturesUnordered<PublishFuture>) {
        let mut state = self.lock();
        let target = state.publish_target(self.settings.max_pending_publish_requests);
        while in_flight.len() < target {
            let acknowledgements = state.take_acknowledgements();
            let timeout = self.publish_timeout(&state, target);
            let epoch = state.epoch;
            let request = PublishRequest {
                request_header: RequestHeader::default(),
                subscription_acknowledgements: acknowledgements.clone(),
            };
            let invoker = Arc::clone(&self.invoker);
            in_flight.push(Box::pin(async move {
                let result = match invoker.invoke(request.into(), timeout).await {
                    Ok(response) => response.into_typed::<PublishResponse>(),
                    Err(e) => Err(e),
                };
                PublishOutcome {
                    epoch,
                    acknowledgements,
                    result,
                }
            }));
        }
        state.outstanding = in_flight.len();
        state.update_late(self.settings.late_publish_threshold);
    }

    async fn process(&self, outcome: PublishOutcome, outstanding: usize) {
        {
            let mut state = self.lock();
            state.outstanding = outstanding;
        }
        match outcome.result {
            Ok(response) => {
                for (ack, status) in outcome.acknowledgements.iter().zip(&response.results) {
                    if status.is_bad() {
                        log::debug!(
                            "Acknowledgement of {} on subscription {}: {}",
                            ack.sequence_number,
                            ack.subscription_id,
                            status
                        );
                    }
                }
                self.on_publish_response(response).await;
            }
            Err(error) => self.on_publish_error(outcome.epoch, outcome.acknowledgements, error, outstanding),
        }
    }

    async fn on_publish_response(&self, response: PublishResponse) {
        let id = response.subscription_id;
        let available = response.available_sequence_numbers;
        let message = response.notification_message;
        let keep_alive = message.is_keep_alive();
        let publish_time = message.publish_time;
        let sequence_number = message.sequence_number;

        let (missing, listener) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(subscription) = state.subscriptions.get_mut(&id) else {
                log::debug!("Publish response for unknown subscription {}", id);
                return;
            };
            if subscription.state == SubscriptionState::Created {
                subscription.transition(SubscriptionState::Normal);
            }
            subscription.touch(Instant::now());
            let listener = subscription.listener.clone();
            let missing = if keep_alive {
                subscription.tracker.observe_keep_alive(sequence_number)
            } else {
                let received = subscription.tracker.receive(message);
                state.acknowledgements.push(SubscriptionAcknowledgement {
                    subscription_id: id,
                    sequence_number,
                });
                match received {
                    Received::Accepted { missing } => missing,
                    Received::Duplicate => {
                        log::debug!("Dropping duplicate message {} on subscription {}", sequence_number, id);
                        return;
                    }
                }
            };
            (retain_available(&mut subscription.tracker, missing, &available), listener)
        };

        if keep_alive {
            log::trace!("Keep-alive on subscription {}", id);
            if let Some(listener) = &listener {
                listener.on_keep_alive(id, publish_time);
            }
        }
        if !missing.is_empty() {
            log::warn!(
                "Subscription {} missed {} message(s) before {}, republishing",
                id,
                missing.len(),
                sequence_number
            );
        }
        for n in missing {
            self.republish(self.invoker.as_ref(), id, n).await;
        }
        self.deliver(id);
    }

    /// After a transfer: acknowledge what was delivered and fetch the rest
    /// of the messages the server still holds
    async fn catch_up(&self, invoker: &dyn ServiceInvoker, id: u32, available: &[u32]) {
        let missing = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let Some(subscription) = state.subscriptions.get_mut(&id) else {
                return;
            };
            let expected = subscription.tracker.expected();
            let mut newest: Option<u32> = None;
            for &n in available {
                if subscription.tracker.is_delivered(n) {
                    let acked = state
                        .acknowledgements
                        .iter()
                        .any(|ack| ack.subscription_id == id && ack.sequence_number == n);
                    if !acked {
                        state.acknowledgements.push(SubscriptionAcknowledgement {
                            subscription_id: id,
                            sequence_number: n,
                        });
                    }
                } else if newest.is_none_or(|m| distance(expected, n) > distance(expected, m)) {
                    newest = Some(n);
                }
            }
            match newest {
                Some(last) => {
                    let missing = subscription.tracker.missing_through(last);
                    retain_available(&mut subscription.tracker, missing, available)
                }
                None => Vec::new(),
            }
        };
        if !missing.is_empty() {
            log::info!("Subscription {} fetching {} message(s) retained across the transfer", id, missing.len());
        }
        for n in missing {
            self.republish(invoker, id, n).await;
        }
        self.deliver(id);
    }

    async fn republish(&self, invoker: &dyn ServiceInvoker, id: u32, sequence_number: u32) {
        let request = RepublishRequest {
            request_header: RequestHeader::default(),
            subscription_id: id,
            retransmit_sequence_number: sequence_number,
        };
        let result = self.call_via::<RepublishResponse>(invoker, request).await;
        let mut state = self.lock();
        let Some(subscription) = state.subscriptions.get_mut(&id) else {
            return;
        };
        match result {
            Ok(response)
                if response.notification_message.sequence_number == sequence_number
                    && !response.notification_message.is_keep_alive() =>
            {
                subscription.tracker.restore(response.notification_message);
                state.acknowledgements.push(SubscriptionAcknowledgement {
                    subscription_id: id,
                    sequence_number,
                });
            }
            Ok(response) => {
                log::warn!(
                    "Republish of {} on subscription {} returned message {}",
                    sequence_number,
                    id,
                    response.notification_message.sequence_number
                );
                subscription.tracker.mark_lost(sequence_number);
            }
            Err(e) => {
                log::debug!("Republish of {} on subscription {} failed: {}", sequence_number, id, e);
                subscription.tracker.mark_lost(sequence_number);
            }
        }
    }

    /// Hand everything deliverable to handlers and the listener
    fn deliver(&self, id: u32) {
        let (dispatch, listener) = {
            let mut state = self.lock();
            let Some(subscription) = state.subscriptions.get_mut(&id) else {
                return;
            };
            let mut dispatch = Vec::new();
            let mut timed_out = false;
            for delivery in subscription.tracker.drain() {
                match delivery {
                    Delivery::Message(message) => {
                        timed_out |= route(subscription, &message, &mut dispatch);
                    }
                    Delivery::Lost(range) => {
                        log::warn!(
                            "Subscription {} lost notification messages {}..={}",
                            id,
                            range.start(),
                            range.end()
                        );
                        dispatch.push(Dispatch::Lost(range));
                    }
                }
            }
            let listener = subscription.listener.clone();
            if timed_out {
                log::warn!("Subscription {} timed out on the server", id);
                subscription.transition(SubscriptionState::Closed);
                state.subscriptions.remove(&id);
                state.acknowledgements.retain(|ack| ack.subscription_id != id);
            }
            (dispatch, listener)
        };

        for item in dispatch {
            match item {
                Dispatch::DataChange(handler, handle, value) => handler.on_data_change(handle, value),
                Dispatch::Event(handler, handle, fields) => handler.on_event(handle, fields),
                Dispatch::Status(status) => {
                    if let Some(listener) = &listener {
                        listener.on_status_changed(id, status);
                    }
                }
                Dispatch::Lost(range) => {
                    if let Some(listener) = &listener {
                        listener.on_data_lost(id, range);
                    }
                }
            }
        }
    }

    /// Report subscriptions that stayed silent past their watchdog deadline
    fn check_watchdogs(&self) {
        let multiplier = self.settings.watchdog_multiplier;
        let now = Instant::now();
        let expired: Vec<(u32, Option<Arc<dyn SubscriptionListener>>)> = {
            let mut state = self.lock();
            if state.suspended {
                return;
            }
            state
                .subscriptions
                .values_mut()
                .filter(|s| s.watchdog_deadline(multiplier).is_some_and(|deadline| deadline <= now))
                .map(|s| {
                    s.fire_watchdog();
                    (s.id, s.listener.clone())
                })
                .collect()
        };
        for (id, listener) in expired {
            log::warn!("Subscription {} silent for {} keep-alive periods", id, multiplier);
            if let Some(listener) = listener {
                listener.on_watchdog_timeout(id);
            }
        }
    }

    fn on_publish_error(
        &self,
        epoch: u64,
        acknowledgements: Vec<SubscriptionAcknowledgement>,
        error: UaError,
        outstanding: usize,
    ) {
        let mut newly_suspended = false;
        let listeners = {
            let mut state = self.lock();
            let mut requeued = acknowledgements;
            requeued.append(&mut state.acknowledgements);
            state.acknowledgements = requeued;

            match &error {
                UaError::Service(status) if *status == StatusCode::BAD_TOO_MANY_PUBLISH_REQUESTS => {
                    let limit = outstanding.max(1);
                    log::warn!("Server limits outstanding publish requests to {}", limit);
                    state.pool_limit = Some(limit);
                }
                UaError::Service(status) if *status == StatusCode::BAD_NO_SUBSCRIPTION => {
                    log::debug!("Server has no subscriptions, publishing paused");
                    state.no_subscription = true;
                }
                UaError::Timeout => log::debug!("Publish request timed out"),
                e if is_connection_error(e) && epoch != state.epoch => {
                    log::debug!("Ignoring failure of a publish request sent before reconnection: {}", e);
                }
                e if is_connection_error(e) => {
                    if !state.suspended {
                        log::warn!("Publish failed, suspending: {}", e);
                        newly_suspended = true;
                    }
                    state.suspended = true;
                    state.update_late(self.settings.late_publish_threshold);
                }
                e => {
                    log::warn!("Publish failed: {}", e);
                    state.retry_at = Some(Instant::now() + PUBLISH_RETRY_DELAY);
                }
            }
            state.listeners()
        };
        for (id, listener) in listeners {
            listener.on_publish_failure(&error);
            if newly_suspended {
                listener.on_communication_lost(id);
            }
        }
    }
}

/// Route one message's notifications; returns true on a server-side timeout
fn route(subscription: &Subscription, message: &NotificationMessage, dispatch: &mut Vec<Dispatch>) -> bool {
    let notifications = match message.notifications() {
        Ok(notifications) => notifications,
        Err(e) => {
            log::warn!(
                "Undecodable message {} on subscription {}: {}",
                message.sequence_number,
                subscription.id,
                e
            );
            return false;
        }
    };
    let mut timed_out = false;
    for notification in notifications {
        match notification {
            NotificationData::DataChange(change) => {
                for item in change.monitored_items {
                    match subscription.items.get(&item.client_handle) {
                        Some(monitored) => {
                            dispatch.push(Dispatch::DataChange(monitored.handler(), item.client_handle, item.value))
                        }
                        None => log::debug!(
                            "Data change for unknown client handle {} on subscription {}",
                            item.client_handle,
                            subscription.id
                        ),
                    }
                }
            }
            NotificationData::Event(list) => {
                for event in list.events {
                    match subscription.items.get(&event.client_handle) {
                        Some(monitored) => {
                            dispatch.push(Dispatch::Event(monitored.handler(), event.client_handle, event.event_fields))
                        }
                        None => log::debug!(
                            "Event for unknown client handle {} on subscription {}",
                            event.client_handle,
                            subscription.id
                        ),
                    }
                }
            }
            NotificationData::StatusChange(change) => {
                log::info!("Subscription {} status changed: {}", subscription.id, change.status);
                timed_out |= change.status == StatusCode::BAD_TIMEOUT;
                dispatch.push(Dispatch::Status(change.status));
            }
        }
    }
    timed_out
}

async fn run_engine(inner: Arc<Inner>) {
    let mut in_flight: FuturesUnordered<PublishFuture> = FuturesUnordered::new();
    log::debug!("Publish engine started");
    loop {
        inner.replenish(&mut in_flight);
        let (retry_at, watchdog_at) = {
            let state = inner.lock();
            (state.retry_at, state.watchdog_at(inner.settings.watchdog_multiplier))
        };
        tokio::select! {
            Some(outcome) = in_flight.next(), if !in_flight.is_empty() => {
                let outstanding = in_flight.len();
                inner.process(outcome, outstanding).await;
            }
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                inner.lock().retry_at = None;
            }
            _ = tokio::time::sleep_until(watchdog_at.unwrap_or_else(Instant::now)), if watchdog_at.is_some() => {
                inner.check_watchdogs();
            }
        }
    }
}
