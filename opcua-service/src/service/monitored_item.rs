//! Monitored item services

use crate::header::{RequestHeader, ResponseHeader};
use crate::service::attribute::{ReadValueId, TimestampsToReturn};
use opcua_core::{
    binary_enum, binary_struct, BinaryEncodingId, DiagnosticInfo, ExtensionObject, StatusCode,
};

binary_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum MonitoringMode {
        Disabled = 0,
        Sampling = 1,
        #[default]
        Reporting = 2,
    }
}

binary_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum DataChangeTrigger {
        Status = 0,
        #[default]
        StatusValue = 1,
        StatusValueTimestamp = 2,
    }
}

/// Deadband kinds of a [`DataChangeFilter`]
pub mod deadband_type {
    pub const NONE: u32 = 0;
    pub const ABSOLUTE: u32 = 1;
    pub const PERCENT: u32 = 2;
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct DataChangeFilter {
        pub trigger: DataChangeTrigger,
        pub deadband_type: u32,
        pub deadband_value: f64,
    }
}

impl BinaryEncodingId for DataChangeFilter {
    const BINARY_ENCODING_ID: u32 = 724;
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct MonitoringParameters {
        /// Client-chosen handle carried by every notification of the item
        pub client_handle: u32,
        pub sampling_interval: f64,
        pub filter: ExtensionObject,
        pub queue_size: u32,
        pub discard_oldest: bool,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct MonitoredItemCreateRequest {
        pub item_to_monitor: ReadValueId,
        pub monitoring_mode: MonitoringMode,
        pub requested_parameters: MonitoringParameters,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct MonitoredItemCreateResult {
        pub status_code: StatusCode,
        pub monitored_item_id: u32,
        pub revised_sampling_interval: f64,
        pub revised_queue_size: u32,
        pub filter_result: ExtensionObject,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CreateMonitoredItemsRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub timestamps_to_return: TimestampsToReturn,
        pub items_to_create: Vec<MonitoredItemCreateRequest>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CreateMonitoredItemsResponse {
        pub response_header: ResponseHeader,
        pub results: Vec<MonitoredItemCreateResult>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct MonitoredItemModifyRequest {
        pub monitored_item_id: u32,
        pub requested_parameters: MonitoringParameters,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct MonitoredItemModifyResult {
        pub status_code: StatusCode,
        pub revised_sampling_interval: f64,
        pub revised_queue_size: u32,
        pub filter_result: ExtensionObject,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ModifyMonitoredItemsRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub timestamps_to_return: TimestampsToReturn,
        pub items_to_modify: Vec<MonitoredItemModifyRequest>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ModifyMonitoredItemsResponse {
        pub response_header: ResponseHeader,
        pub results: Vec<MonitoredItemModifyResult>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct DeleteMonitoredItemsRequest {
        pub request_header: RequestHeader,
        pub subscription_id: u32,
        pub monitored_item_ids: Vec<u32>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct DeleteMonitoredItemsResponse {
        pub response_header: ResponseHeader,
        pub results: Vec<StatusCode>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}
