//! Monitored items and their notification handlers

use opcua_core::{DataValue, ExtensionObject, NodeId, StatusCode, Variant};
use opcua_service::{MonitoredItemCreateRequest, MonitoringMode, MonitoringParameters, ReadValueId};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives the notifications of monitored items
///
/// Called from the publish engine task, in sequence-number order, with no
/// internal lock held. Implementations should return quickly.
pub trait MonitoredItemHandler: Send + Sync {
    fn on_data_change(&self, client_handle: u32, value: DataValue);

    fn on_event(&self, client_handle: u32, fields: Vec<Variant>) {
        log::debug!(
            "Dropping event with {} fields for item {}",
            fields.len(),
            client_handle
        );
    }
}

/// A notification forwarded through a channel
#[derive(Debug, Clone, PartialEq)]
pub enum ItemNotification {
    DataChange { client_handle: u32, value: DataValue },
    Event { client_handle: u32, fields: Vec<Variant> },
}

impl ItemNotification {
    pub fn client_handle(&self) -> u32 {
        match self {
            ItemNotification::DataChange { client_handle, .. }
            | ItemNotification::Event { client_handle, .. } => *client_handle,
        }
    }
}

impl MonitoredItemHandler for mpsc::UnboundedSender<ItemNotification> {
    fn on_data_change(&self, client_handle: u32, value: DataValue) {
        let _ = self.send(ItemNotification::DataChange {
            client_handle,
            value,
        });
    }

    fn on_event(&self, client_handle: u32, fields: Vec<Variant>) {
        let _ = self.send(ItemNotification::Event {
            client_handle,
            fields,
        });
    }
}

/// Definition of a monitored item to create
#[derive(Clone)]
pub struct MonitoredItemRequest {
    pub item_to_monitor: ReadValueId,
    pub monitoring_mode: MonitoringMode,
    /// Milliseconds; negative selects the publishing interval
    pub sampling_interval: f64,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub filter: ExtensionObject,
    pub handler: Arc<dyn MonitoredItemHandler>,
}

impl fmt::Debug for MonitoredItemRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredItemRequest")
            .field("item_to_monitor", &self.item_to_monitor)
            .field("monitoring_mode", &self.monitoring_mode)
            .field("sampling_interval", &self.sampling_interval)
            .field("queue_size", &self.queue_size)
            .finish()
    }
}

impl MonitoredItemRequest {
    /// Report changes of the Value attribute of `node_id`
    pub fn value_of(node_id: NodeId, handler: Arc<dyn MonitoredItemHandler>) -> Self {
        Self::new(ReadValueId::value_of(node_id), handler)
    }

    pub fn new(item_to_monitor: ReadValueId, handler: Arc<dyn MonitoredItemHandler>) -> Self {
        Self {
            item_to_monitor,
            monitoring_mode: MonitoringMode::Reporting,
            sampling_interval: -1.0,
            queue_size: 1,
            discard_oldest: true,
            filter: ExtensionObject::null(),
            handler,
        }
    }

    pub fn sampling_interval(mut self, millis: f64) -> Self {
        self.sampling_interval = millis;
        self
    }

    pub fn queue_size(mut self, queue_size: u32) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn discard_oldest(mut self, discard_oldest: bool) -> Self {
        self.discard_oldest = discard_oldest;
        self
    }

    pub fn filter(mut self, filter: ExtensionObject) -> Self {
        self.filter = filter;
        self
    }

    pub fn monitoring_mode(mut self, mode: MonitoringMode) -> Self {
        self.monitoring_mode = mode;
        self
    }
}

/// Parameters changed by ModifyMonitoredItems
#[derive(Debug, Clone, PartialEq)]
pub struct ItemModification {
    pub client_handle: u32,
    pub sampling_interval: f64,
    pub queue_size: u32,
    pub discard_oldest: bool,
    pub filter: ExtensionObject,
}

/// Outcome of creating one monitored item
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CreatedItem {
    pub client_handle: u32,
    pub status: StatusCode,
    pub monitored_item_id: u32,
    pub revised_sampling_interval: f64,
    pub revised_queue_size: u32,
}

/// A monitored item retained by its subscription
///
/// The client handle is the stable identity. The server id changes when
/// the subscription is recreated on a new session.
#[derive(Clone)]
pub struct MonitoredItem {
    client_handle: u32,
    monitored_item_id: u32,
    definition: MonitoredItemRequest,
    revised_sampling_interval: f64,
    revised_queue_size: u32,
}

impl fmt::Debug for MonitoredItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredItem")
            .field("client_handle", &self.client_handle)
            .field("monitored_item_id", &self.monitored_item_id)
            .field("node_id", &self.definition.item_to_monitor.node_id)
            .finish()
    }
}

impl MonitoredItem {
    pub(crate) fn new(client_handle: u32, definition: MonitoredItemRequest) -> Self {
        Self {
            client_handle,
            monitored_item_id: 0,
            revised_sampling_interval: definition.sampling_interval,
            revised_queue_size: definition.queue_size,
            definition,
        }
    }

    pub fn client_handle(&self) -> u32 {
        self.client_handle
    }

    pub fn monitored_item_id(&self) -> u32 {
        self.monitored_item_id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.definition.item_to_monitor.node_id
    }

    pub fn definition(&self) -> &MonitoredItemRequest {
        &self.definition
    }

    pub fn revised_sampling_interval(&self) -> f64 {
        self.revised_sampling_interval
    }

    pub fn revised_queue_size(&self) -> u32 {
        self.revised_queue_size
    }

    pub(crate) fn handler(&self) -> Arc<dyn MonitoredItemHandler> {
        Arc::clone(&self.definition.handler)
    }

    pub(crate) fn create_request(&self) -> MonitoredItemCreateRequest {
        let d = &self.definition;
        MonitoredItemCreateRequest {
            item_to_monitor: d.item_to_monitor.clone(),
            monitoring_mode: d.monitoring_mode,
            requested_parameters: MonitoringParameters {
                client_handle: self.client_handle,
                sampling_interval: d.sampling_interval,
                filter: d.filter.clone(),
                queue_size: d.queue_size,
                discard_oldest: d.discard_oldest,
            },
        }
    }

    pub(crate) fn learn(&mut self, monitored_item_id: u32, sampling_interval: f64, queue_size: u32) {
        self.monitored_item_id = monitored_item_id;
        self.revised_sampling_interval = sampling_interval;
        self.revised_queue_size = queue_size;
    }

    pub(crate) fn apply(&mut self, modification: &ItemModification, sampling_interval: f64, queue_size: u32) {
        self.definition.sampling_interval = modification.sampling_interval;
        self.definition.queue_size = modification.queue_size;
        self.definition.discard_oldest = modification.discard_oldest;
        self.definition.filter = modification.filter.clone();
        self.revised_sampling_interval = sampling_interval;
        self.revised_queue_size = queue_size;
    }
}
