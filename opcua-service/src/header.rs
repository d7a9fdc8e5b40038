//! Request and response headers shared by every service

use opcua_core::{binary_struct, DateTime, DiagnosticInfo, ExtensionObject, NodeId, StatusCode};

binary_struct! {
    /// Header of every service request
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct RequestHeader {
        /// Session authentication token, null before a session exists
        pub authentication_token: NodeId,
        pub timestamp: DateTime,
        /// Client-assigned handle echoed in the response header
        pub request_handle: u32,
        pub return_diagnostics: u32,
        pub audit_entry_id: String,
        /// Milliseconds the client is willing to wait, 0 for no hint
        pub timeout_hint: u32,
        pub additional_header: ExtensionObject,
    }
}

impl RequestHeader {
    /// Header stamped with the current time
    pub fn new(authentication_token: NodeId, request_handle: u32, timeout_hint: u32) -> Self {
        Self {
            authentication_token,
            timestamp: DateTime::now(),
            request_handle,
            timeout_hint,
            ..Default::default()
        }
    }
}

binary_struct! {
    /// Header of every service response
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ResponseHeader {
        pub timestamp: DateTime,
        pub request_handle: u32,
        pub service_result: StatusCode,
        pub service_diagnostics: DiagnosticInfo,
        pub string_table: Vec<String>,
        pub additional_header: ExtensionObject,
    }
}

impl ResponseHeader {
    /// Header answering `request_handle` with `service_result`
    pub fn new(request_handle: u32, service_result: StatusCode) -> Self {
        Self {
            timestamp: DateTime::now(),
            request_handle,
            service_result,
            ..Default::default()
        }
    }
}
