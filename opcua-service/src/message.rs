//! Typed service message envelope
//!
//! A service message body is the NodeId of the structure's DefaultBinary
//! encoding followed by the structure itself. [`ServiceRequest`] and
//! [`ServiceResponse`] dispatch on that id.

use crate::header::{RequestHeader, ResponseHeader};
use crate::service::*;
use opcua_core::{
    binary_struct, BinaryDecoder, BinaryEncodable, BinaryEncoder, BinaryEncodingId, NodeId,
    UaError, UaResult,
};

binary_struct! {
    /// Response sent instead of the expected one when a service fails as a whole
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ServiceFault {
        pub response_header: ResponseHeader,
    }
}

/// Typed access to one response variant of [`ServiceResponse`]
pub trait ServiceResponseType: Sized {
    /// Extract the expected response
    ///
    /// # Errors
    ///
    /// A `ServiceFault`, or a `Bad` service result in the header, yields
    /// `UaError::Service`. A response of another type yields
    /// `UaError::Protocol`.
    fn from_response(response: ServiceResponse) -> UaResult<Self>;
}

macro_rules! service_messages {
    (
        requests { $($req:ident = $req_id:literal,)* }
        responses { $($resp:ident = $resp_id:literal,)* }
    ) => {
        $(
            impl BinaryEncodingId for $req {
                const BINARY_ENCODING_ID: u32 = $req_id;
            }

            impl From<$req> for ServiceRequest {
                fn from(value: $req) -> Self {
                    ServiceRequest::$req(value)
                }
            }
        )*

        $(
            impl BinaryEncodingId for $resp {
                const BINARY_ENCODING_ID: u32 = $resp_id;
            }

            impl From<$resp> for ServiceResponse {
                fn from(value: $resp) -> Self {
                    ServiceResponse::$resp(value)
                }
            }
        )*

        /// Any request the client sends
        #[derive(Debug, Clone, PartialEq)]
        pub enum ServiceRequest {
            $( $req($req), )*
        }

        impl ServiceRequest {
            pub fn encoding_id(&self) -> u32 {
                match self {
                    $( ServiceRequest::$req(_) => $req_id, )*
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    $( ServiceRequest::$req(_) => stringify!($req), )*
                }
            }

            pub fn request_header(&self) -> &RequestHeader {
                match self {
                    $( ServiceRequest::$req(r) => &r.request_header, )*
                }
            }

            pub fn request_header_mut(&mut self) -> &mut RequestHeader {
                match self {
                    $( ServiceRequest::$req(r) => &mut r.request_header, )*
                }
            }

            fn encode_body(&self, encoder: &mut BinaryEncoder) {
                match self {
                    $( ServiceRequest::$req(r) => r.encode(encoder), )*
                }
            }

            fn decode_body(id: u32, decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
                match id {
                    $( $req_id => Ok(ServiceRequest::$req($req::decode(decoder)?)), )*
                    other => Err(UaError::Decoding(format!(
                        "unknown request encoding id {}", other
                    ))),
                }
            }
        }

        /// Any response the client receives
        #[derive(Debug, Clone, PartialEq)]
        pub enum ServiceResponse {
            ServiceFault(ServiceFault),
            $( $resp($resp), )*
        }

        impl ServiceResponse {
            pub fn encoding_id(&self) -> u32 {
                match self {
                    ServiceResponse::ServiceFault(_) => ServiceFault::BINARY_ENCODING_ID,
                    $( ServiceResponse::$resp(_) => $resp_id, )*
                }
            }

            pub fn name(&self) -> &'static str {
                match self {
                    ServiceResponse::ServiceFault(_) => "ServiceFault",
                    $( ServiceResponse::$resp(_) => stringify!($resp), )*
                }
            }

            pub fn response_header(&self) -> &ResponseHeader {
                match self {
                    ServiceResponse::ServiceFault(r) => &r.response_header,
                    $( ServiceResponse::$resp(r) => &r.response_header, )*
                }
            }

            pub fn response_header_mut(&mut self) -> &mut ResponseHeader {
                match self {
                    ServiceResponse::ServiceFault(r) => &mut r.response_header,
                    $( ServiceResponse::$resp(r) => &mut r.response_header, )*
                }
            }

            fn encode_body(&self, encoder: &mut BinaryEncoder) {
                match self {
                    ServiceResponse::ServiceFault(r) => r.encode(encoder),
                    $( ServiceResponse::$resp(r) => r.encode(encoder), )*
                }
            }

            fn decode_body(id: u32, decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
                match id {
                    397 => Ok(ServiceResponse::ServiceFault(ServiceFault::decode(decoder)?)),
                    $( $resp_id => Ok(ServiceResponse::$resp($resp::decode(decoder)?)), )*
                    other => Err(UaError::Decoding(format!(
                        "unknown response encoding id {}", other
                    ))),
                }
            }
        }

        $(
            impl ServiceResponseType for $resp {
                fn from_response(response: ServiceResponse) -> UaResult<Self> {
                    let status = response.response_header().service_result;
                    if status.is_bad() {
                        return Err(UaError::Service(status));
                    }
                    match response {
                        ServiceResponse::$resp(r) => Ok(r),
                        other => Err(UaError::Protocol(format!(
                            "expected {}, received {}",
                            stringify!($resp),
                            other.name()
                        ))),
                    }
                }
            }
        )*
    };
}

impl BinaryEncodingId for ServiceFault {
    const BINARY_ENCODING_ID: u32 = 397;
}

service_messages! {
    requests {
        OpenSecureChannelRequest = 446,
        CloseSecureChannelRequest = 452,
        CreateSessionRequest = 461,
        ActivateSessionRequest = 467,
        CloseSessionRequest = 473,
        TranslateBrowsePathsToNodeIdsRequest = 554,
        ReadRequest = 631,
        WriteRequest = 673,
        CreateMonitoredItemsRequest = 751,
        ModifyMonitoredItemsRequest = 763,
        DeleteMonitoredItemsRequest = 781,
        CreateSubscriptionRequest = 787,
        ModifySubscriptionRequest = 793,
        SetPublishingModeRequest = 799,
        PublishRequest = 826,
        RepublishRequest = 832,
        TransferSubscriptionsRequest = 841,
        DeleteSubscriptionsRequest = 847,
    }
    responses {
        OpenSecureChannelResponse = 449,
        CloseSecureChannelResponse = 455,
        CreateSessionResponse = 464,
        ActivateSessionResponse = 470,
        CloseSessionResponse = 476,
        TranslateBrowsePathsToNodeIdsResponse = 557,
        ReadResponse = 634,
        WriteResponse = 676,
        CreateMonitoredItemsResponse = 754,
        ModifyMonitoredItemsResponse = 766,
        DeleteMonitoredItemsResponse = 784,
        CreateSubscriptionResponse = 790,
        ModifySubscriptionResponse = 796,
        SetPublishingModeResponse = 802,
        PublishResponse = 829,
        RepublishResponse = 835,
        TransferSubscriptionsResponse = 844,
        DeleteSubscriptionsResponse = 850,
    }
}

fn read_encoding_id(decoder: &mut BinaryDecoder<'_>) -> UaResult<u32> {
    let type_id = NodeId::decode(decoder)?;
    type_id
        .as_ns0_numeric()
        .ok_or_else(|| UaError::Decoding(format!("unexpected message type id {}", type_id)))
}

impl BinaryEncodable for ServiceRequest {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        NodeId::ns0(self.encoding_id()).encode(encoder);
        self.encode_body(encoder);
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let id = read_encoding_id(decoder)?;
        Self::decode_body(id, decoder)
    }
}

impl BinaryEncodable for ServiceResponse {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        NodeId::ns0(self.encoding_id()).encode(encoder);
        self.encode_body(encoder);
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let id = read_encoding_id(decoder)?;
        Self::decode_body(id, decoder)
    }
}

impl ServiceResponse {
    /// Fault response answering `request_handle`
    pub fn fault(request_handle: u32, status: opcua_core::StatusCode) -> Self {
        ServiceResponse::ServiceFault(ServiceFault {
            response_header: ResponseHeader::new(request_handle, status),
        })
    }

    /// Convert into the expected response type
    pub fn into_typed<T: ServiceResponseType>(self) -> UaResult<T> {
        T::from_response(self)
    }
}
