//! Subscription-level callbacks

use opcua_core::{DateTime, StatusCode, UaError};
use std::ops::RangeInclusive;
use tokio::sync::mpsc;

/// Observer of one subscription's lifecycle
///
/// Every method has an empty default. Callbacks run on the publish engine
/// task with no internal lock held.
pub trait SubscriptionListener: Send + Sync {
    /// A keep-alive arrived; nothing changed since the last message
    fn on_keep_alive(&self, _subscription_id: u32, _publish_time: DateTime) {}

    /// The server sent a StatusChangeNotification
    fn on_status_changed(&self, _subscription_id: u32, _status: StatusCode) {}

    /// Notification messages in `missing` could not be recovered
    fn on_data_lost(&self, _subscription_id: u32, _missing: RangeInclusive<u32>) {}

    fn on_publish_failure(&self, _error: &UaError) {}

    /// The connection dropped; notifications pause until reconnection
    fn on_communication_lost(&self, _subscription_id: u32) {}

    /// The subscription was recreated under a new server id
    fn on_resubscribed(&self, _old_id: u32, _new_id: u32) {}

    /// The server refused to transfer the subscription to a new session
    fn on_transfer_failed(&self, _subscription_id: u32, _status: StatusCode) {}

    /// Nothing, not even a keep-alive, arrived within the watchdog period
    fn on_watchdog_timeout(&self, _subscription_id: u32) {}
}

/// A listener callback forwarded through a channel
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    KeepAlive { subscription_id: u32 },
    StatusChanged { subscription_id: u32, status: StatusCode },
    DataLost { subscription_id: u32, missing: RangeInclusive<u32> },
    PublishFailure { error: String },
    CommunicationLost { subscription_id: u32 },
    Resubscribed { old_id: u32, new_id: u32 },
    TransferFailed { subscription_id: u32, status: StatusCode },
    WatchdogTimeout { subscription_id: u32 },
}

impl SubscriptionListener for mpsc::UnboundedSender<SubscriptionEvent> {
    fn on_keep_alive(&self, subscription_id: u32, _publish_time: DateTime) {
        let _ = self.send(SubscriptionEvent::KeepAlive { subscription_id });
    }

    fn on_status_changed(&self, subscription_id: u32, status: StatusCode) {
        let _ = self.send(SubscriptionEvent::StatusChanged {
            subscription_id,
            status,
        });
    }

    fn on_data_lost(&self, subscription_id: u32, missing: RangeInclusive<u32>) {
        let _ = self.send(SubscriptionEvent::DataLost {
            subscription_id,
            missing,
        });
    }

    fn on_publish_failure(&self, error: &UaError) {
        let _ = self.send(SubscriptionEvent::PublishFailure {
            error: error.to_string(),
        });
    }

    fn on_communication_lost(&self, subscription_id: u32) {
        let _ = self.send(SubscriptionEvent::CommunicationLost { subscription_id });
    }

    fn on_resubscribed(&self, old_id: u32, new_id: u32) {
        let _ = self.send(SubscriptionEvent::Resubscribed { old_id, new_id });
    }

    fn on_transfer_failed(&self, subscription_id: u32, status: StatusCode) {
        let _ = self.send(SubscriptionEvent::TransferFailed {
            subscription_id,
            status,
        });
    }

    fn on_watchdog_timeout(&self, subscription_id: u32) {
        let _ = self.send(SubscriptionEvent::WatchdogTimeout { subscription_id });
    }
}
