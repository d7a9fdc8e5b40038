//! Notification messages delivered by the publish cycle

use opcua_core::{
    binary_struct, BinaryEncodingId, DataValue, DateTime, DiagnosticInfo, ExtensionObject,
    StatusCode, UaResult, Variant,
};

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct NotificationMessage {
        pub sequence_number: u32,
        pub publish_time: DateTime,
        pub notification_data: Vec<ExtensionObject>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct MonitoredItemNotification {
        pub client_handle: u32,
        pub value: DataValue,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct DataChangeNotification {
        pub monitored_items: Vec<MonitoredItemNotification>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct EventFieldList {
        pub client_handle: u32,
        pub event_fields: Vec<Variant>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct EventNotificationList {
        pub events: Vec<EventFieldList>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct StatusChangeNotification {
        pub status: StatusCode,
        pub diagnostic_info: DiagnosticInfo,
    }
}

impl BinaryEncodingId for DataChangeNotification {
    const BINARY_ENCODING_ID: u32 = 811;
}

impl BinaryEncodingId for StatusChangeNotification {
    const BINARY_ENCODING_ID: u32 = 820;
}

impl BinaryEncodingId for EventNotificationList {
    const BINARY_ENCODING_ID: u32 = 916;
}

/// Decoded payload of a notification message
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationData {
    DataChange(DataChangeNotification),
    Event(EventNotificationList),
    StatusChange(StatusChangeNotification),
}

impl NotificationMessage {
    /// A message without notifications, sent when nothing changed
    pub fn keep_alive(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            publish_time: DateTime::now(),
            notification_data: Vec::new(),
        }
    }

    /// Message carrying the given payloads
    pub fn with_data(sequence_number: u32, data: &[NotificationData]) -> Self {
        let notification_data = data
            .iter()
            .map(|item| match item {
                NotificationData::DataChange(n) => ExtensionObject::from_encodable(n),
                NotificationData::Event(n) => ExtensionObject::from_encodable(n),
                NotificationData::StatusChange(n) => ExtensionObject::from_encodable(n),
            })
            .collect();
        Self {
            sequence_number,
            publish_time: DateTime::now(),
            notification_data,
        }
    }

    /// Keep-alive messages carry no notifications and do not consume a
    /// sequence number
    pub fn is_keep_alive(&self) -> bool {
        self.notification_data.is_empty()
    }

    /// Decode the payloads in order, skipping unknown notification types
    ///
    /// # Errors
    ///
    /// Returns `UaError::Decoding` if a known payload is malformed.
    pub fn notifications(&self) -> UaResult<Vec<NotificationData>> {
        let mut out = Vec::with_capacity(self.notification_data.len());
        for object in &self.notification_data {
            if object.is::<DataChangeNotification>() {
                out.push(NotificationData::DataChange(object.decode_as()?));
            } else if object.is::<EventNotificationList>() {
                out.push(NotificationData::Event(object.decode_as()?));
            } else if object.is::<StatusChangeNotification>() {
                out.push(NotificationData::StatusChange(object.decode_as()?));
            } else {
                log::debug!(
                    "Skipping unknown notification type {} in message {}",
                    object.type_id,
                    self.sequence_number
                );
            }
        }
        Ok(out)
    }
}
