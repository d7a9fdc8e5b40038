//! Subscription and publish engine
//!
//! [`SubscriptionManager`] owns every subscription of a client, keeps a
//! pool of Publish requests outstanding, and delivers notifications to the
//! [`MonitoredItemHandler`] of each item in sequence-number order. Gaps are
//! filled with Republish; what cannot be recovered is reported through
//! [`SubscriptionListener::on_data_lost`].
//!
//! Subscriptions and monitored items keep their client-side definition so
//! they can be transferred or recreated after reconnection. Client handles
//! survive recreation, server ids are re-learned.

mod listener;
mod manager;
mod monitored_item;
mod sequence;
mod state;

pub use listener::{SubscriptionEvent, SubscriptionListener};
pub use manager::SubscriptionManager;
pub use monitored_item::{
    CreatedItem, ItemModification, ItemNotification, MonitoredItem, MonitoredItemHandler,
    MonitoredItemRequest,
};
pub use sequence::{Delivery, MAX_REPUBLISH_GAP, Received, SequenceTracker};
pub use state::SubscriptionState;

use opcua_service::{CreateSubscriptionRequest, CreateSubscriptionResponse, ModifySubscriptionRequest, RequestHeader};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const KEEP_ALIVE_TARGET: Duration = Duration::from_secs(10);
const LIFETIME_FACTOR: u32 = 6;

/// Keep-alive count giving a keep-alive about every ten seconds
pub fn default_keep_alive_count(publishing_interval: Duration) -> u32 {
    let interval = publishing_interval.as_millis();
    if interval == 0 {
        return 10;
    }
    let target = KEEP_ALIVE_TARGET.as_millis();
    (target.div_ceil(interval) as u32).max(1)
}

/// Requested parameters of a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSettings {
    pub publishing_interval: Duration,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
    /// 0 for no limit
    pub max_notifications_per_publish: u32,
    pub publishing_enabled: bool,
    pub priority: u8,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}

impl SubscriptionSettings {
    /// Settings for `publishing_interval` with derived keep-alive and
    /// lifetime counts
    pub fn new(publishing_interval: Duration) -> Self {
        let max_keep_alive_count = default_keep_alive_count(publishing_interval);
        Self {
            publishing_interval,
            lifetime_count: max_keep_alive_count * LIFETIME_FACTOR,
            max_keep_alive_count,
            max_notifications_per_publish: 0,
            publishing_enabled: true,
            priority: 0,
        }
    }

    pub fn with_keep_alive_count(mut self, count: u32) -> Self {
        self.max_keep_alive_count = count.max(1);
        self.lifetime_count = self.lifetime_count.max(self.max_keep_alive_count * 3);
        self
    }

    pub fn with_lifetime_count(mut self, count: u32) -> Self {
        self.lifetime_count = count;
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_publishing_enabled(mut self, enabled: bool) -> Self {
        self.publishing_enabled = enabled;
        self
    }

    pub(crate) fn create_request(&self) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            request_header: RequestHeader::default(),
            requested_publishing_interval: self.publishing_interval.as_secs_f64() * 1000.0,
            requested_lifetime_count: self.lifetime_count,
            requested_max_keep_alive_count: self.max_keep_alive_count,
            max_notifications_per_publish: self.max_notifications_per_publish,
            publishing_enabled: self.publishing_enabled,
            priority: self.priority,
        }
    }

    pub(crate) fn modify_request(&self, subscription_id: u32) -> ModifySubscriptionRequest {
        ModifySubscriptionRequest {
            request_header: RequestHeader::default(),
            subscription_id,
            requested_publishing_interval: self.publishing_interval.as_secs_f64() * 1000.0,
            requested_lifetime_count: self.lifetime_count,
            requested_max_keep_alive_count: self.max_keep_alive_count,
            max_notifications_per_publish: self.max_notifications_per_publish,
            priority: self.priority,
        }
    }
}

/// Parameters as revised by the server
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RevisedParameters {
    pub publishing_interval: Duration,
    pub lifetime_count: u32,
    pub max_keep_alive_count: u32,
}

impl RevisedParameters {
    pub(crate) fn new(publishing_interval_ms: f64, lifetime_count: u32, max_keep_alive_count: u32) -> Self {
        Self {
            publishing_interval: Duration::from_secs_f64(publishing_interval_ms.max(0.0) / 1000.0),
            lifetime_count,
            max_keep_alive_count,
        }
    }

    /// Longest silence before the server sends a keep-alive
    pub fn keep_alive_period(&self) -> Duration {
        self.publishing_interval * self.max_keep_alive_count.max(1)
    }
}

impl From<&CreateSubscriptionResponse> for RevisedParameters {
    fn from(response: &CreateSubscriptionResponse) -> Self {
        Self::new(
            response.revised_publishing_interval,
            response.revised_lifetime_count,
            response.revised_max_keep_alive_count,
        )
    }
}

/// A subscription and its monitored items, keyed by client handle
#[derive(Clone)]
pub struct Subscription {
    id: u32,
    settings: SubscriptionSettings,
    revised: RevisedParameters,
    state: SubscriptionState,
    items: BTreeMap<u32, MonitoredItem>,
    tracker: SequenceTracker,
    listener: Option<Arc<dyn SubscriptionListener>>,
    last_activity: Instant,
    watchdog_fired: bool,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("revised", &self.revised)
            .field("items", &self.items.len())
            .field("next_sequence_number", &self.tracker.expected())
            .finish()
    }
}

impl Subscription {
    pub(crate) fn new(
        id: u32,
        settings: SubscriptionSettings,
        revised: RevisedParameters,
        listener: Option<Arc<dyn SubscriptionListener>>,
    ) -> Self {
        Self {
            id,
            settings,
            revised,
            state: SubscriptionState::Created,
            items: BTreeMap::new(),
            tracker: SequenceTracker::new(),
            listener,
            last_activity: Instant::now(),
            watchdog_fired: false,
        }
    }

    /// Server-assigned id
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }

    pub fn revised(&self) -> &RevisedParameters {
        &self.revised
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    pub fn monitored_items(&self) -> impl Iterator<Item = &MonitoredItem> {
        self.items.values()
    }

    pub fn monitored_item(&self, client_handle: u32) -> Option<&MonitoredItem> {
        self.items.get(&client_handle)
    }

    /// Sequence number of the next notification message to deliver
    pub fn next_sequence_number(&self) -> u32 {
        self.tracker.expected()
    }

    /// Record traffic from the server; rearms the watchdog
    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_activity = now;
        self.watchdog_fired = false;
    }

    /// When the watchdog fires if nothing arrives, `None` once fired or disabled
    pub(crate) fn watchdog_deadline(&self, multiplier: f64) -> Option<Instant> {
        let period = self.revised.keep_alive_period();
        if self.watchdog_fired || multiplier <= 0.0 || period.is_zero() {
            return None;
        }
        Some(self.last_activity + period.mul_f64(multiplier))
    }

    pub(crate) fn fire_watchdog(&mut self) {
        self.watchdog_fired = true;
    }

    pub(crate) fn transition(&mut self, to: SubscriptionState) {
        if self.state == to {
            return;
        }
        if self.state.can_transition_to(to) {
            log::debug!("Subscription {}: {} -> {}", self.id, self.state, to);
            self.state = to;
        } else {
            log::trace!("Subscription {}: ignoring {} -> {}", self.id, self.state, to);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_counts_derive_from_interval() {
        let settings = SubscriptionSettings::new(Duration::from_millis(500));
        assert_eq!(settings.max_keep_alive_count, 20);
        assert_eq!(settings.lifetime_count, 120);

        let slow = SubscriptionSettings::new(Duration::from_secs(30));
        assert_eq!(slow.max_keep_alive_count, 1);
        assert_eq!(slow.lifetime_count, 6);

        let default = SubscriptionSettings::default();
        assert_eq!(default.max_keep_alive_count, 10);
        assert_eq!(default.create_request().requested_publishing_interval, 1000.0);
    }

    #[test]
    fn test_keep_alive_period() {
        let revised = RevisedParameters::new(250.0, 60, 8);
        assert_eq!(revised.keep_alive_period(), Duration::from_secs(2));
    }

    #[test]
    fn test_watchdog_fires_once_until_touched() {
        let revised = RevisedParameters::new(250.0, 60, 8);
        let mut subscription = Subscription::new(1, SubscriptionSettings::default(), revised, None);
        let start = subscription.last_activity;
        assert_eq!(subscription.watchdog_deadline(2.0), Some(start + Duration::from_secs(4)));
        assert_eq!(subscription.watchdog_deadline(0.0), None);

        subscription.fire_watchdog();
        assert_eq!(subscription.watchdog_deadline(2.0), None);

        let later = start + Duration::from_secs(10);
        subscription.touch(later);
        assert_eq!(subscription.watchdog_deadline(1.5), Some(later + Duration::from_secs(3)));
    }
}
