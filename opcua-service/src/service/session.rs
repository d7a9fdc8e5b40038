//! CreateSession, ActivateSession and CloseSession

use crate::header::{RequestHeader, ResponseHeader};
use crate::service::endpoint::{
    ApplicationDescription, EndpointDescription, SignatureData, SignedSoftwareCertificate,
};
use opcua_core::{binary_struct, ByteString, DiagnosticInfo, ExtensionObject, NodeId, StatusCode};

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CreateSessionRequest {
        pub request_header: RequestHeader,
        pub client_description: ApplicationDescription,
        pub server_uri: String,
        pub endpoint_url: String,
        pub session_name: String,
        pub client_nonce: ByteString,
        pub client_certificate: ByteString,
        /// Milliseconds
        pub requested_session_timeout: f64,
        pub max_response_message_size: u32,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CreateSessionResponse {
        pub response_header: ResponseHeader,
        pub session_id: NodeId,
        pub authentication_token: NodeId,
        pub revised_session_timeout: f64,
        pub server_nonce: ByteString,
        pub server_certificate: ByteString,
        pub server_endpoints: Vec<EndpointDescription>,
        pub server_software_certificates: Vec<SignedSoftwareCertificate>,
        pub server_signature: SignatureData,
        pub max_request_message_size: u32,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ActivateSessionRequest {
        pub request_header: RequestHeader,
        pub client_signature: SignatureData,
        pub client_software_certificates: Vec<SignedSoftwareCertificate>,
        pub locale_ids: Vec<String>,
        pub user_identity_token: ExtensionObject,
        pub user_token_signature: SignatureData,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ActivateSessionResponse {
        pub response_header: ResponseHeader,
        pub server_nonce: ByteString,
        pub results: Vec<StatusCode>,
        pub diagnostic_infos: Vec<DiagnosticInfo>,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CloseSessionRequest {
        pub request_header: RequestHeader,
        pub delete_subscriptions: bool,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CloseSessionResponse {
        pub response_header: ResponseHeader,
    }
}
