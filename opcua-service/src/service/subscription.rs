//! Subscription services and the publish cycle

use crate::header::{RequestHeader, ResponseHeader};
use crate::service::notification::NotificationMessage;
use opcua_core::{binary_struct, DiagnosticInfo, StatusCode};

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CreateSubscriptionRequest {
        pub request_header: RequestHeader,
        pub requested_publishing_interval: f64,
        pub requested_lifetime_count: u32,
        pub requested_max_keep_alive_count: u32,
        pub max_notifications_per_publish: u32,
        pub publishing_enabled: bool,
        pub priority: u8,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CreateSubscriptionResponse {
        pub response_header: ResponseHeader,
        pub subscription_id: u32,
        pub revised_publishing_interval: f64,
        pub revised_lifetime_count: u32,
        pub revised_max_keep_alive_count: u32,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ModifySubscriptionRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub requested_publishing_interval: f64,
        pub requested_lifetime_count: u32,
        pub requested_max_keep_alive_count: u32,
        pub max_notifications_per_publish: u32,
        pub priority: u8,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ModifySubscriptionResponse {
        pub response_header: ResponseHeader,
        pub revised_publishing_interval: f64,
        pub revised_lifetime_count: u32,
        pub revised_max_keep_alive_count: u32,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct SetPublishingModeRequest {
        pub request_header: RequestHeader,
        pub publishing_enabled: bool,
        pub subscription_ids: Vec<u32>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct SetPublishingModeResponse {
        pub response_header: ResponseHeader,
        pub results: Vec<StatusCode>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct DeleteSubscriptionsRequest {
        pub request_header: RequestHeader,
        pub subscription_ids: Vec<u32>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct DeleteSubscriptionsResponse {
        pub response_header: ResponseHeader,
        pub results: Vec<StatusCode>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct TransferSubscriptionsRequest {
        pub request_header: RequestHeader,
        pub subscription_ids: Vec<u32>,
        pub send_initial_values: bool,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct TransferResult {
        pub status_code: StatusCode,
        pub available_sequence_numbers: Vec<u32>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct TransferSubscriptionsResponse {
        pub response_header: ResponseHeader,
        pub results: Vec<TransferResult>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SubscriptionAcknowledgement {
        pub subscription_id: u32,
        pub sequence_number: u32,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct PublishRequest {
        pub request_header: RequestHeader,
        pub subscription_acknowledgements: Vec<SubscriptionAcknowledgement>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct PublishResponse {
        pub response_header: ResponseHeader,
        pub subscription_id: u32,
        pub available_sequence_numbers: Vec<u32>,
        pub more_notifications: bool,
        pub notification_message: NotificationMessage,
        /// Results of the acknowledgements of the request, in order
        pub results: Vec<StatusCode>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct RepublishRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub retransmit_sequence_number: u32,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct RepublishResponse {
        pub response_header: ResponseHeader,
        pub notification_message: NotificationMessage,
    }
}
