//! OpenSecureChannel and CloseSecureChannel

use crate::header::{RequestHeader, ResponseHeader};
use opcua_core::{binary_enum, binary_struct, ByteString, DateTime};

binary_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum SecurityTokenRequestType {
        #[default]
        Issue = 0,
        Renew = 1,
    }
}

binary_enum! {
    /// Protection applied to messages on a secure channel
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum MessageSecurityMode {
        Invalid = 0,
        #[default]
        None = 1,
        Sign = 2,
        SignAndEncrypt = 3,
    }
}

binary_struct! {
    /// Token identifying the keys in use on a channel
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ChannelSecurityToken {
        pub channel_id: u32,
        pub token_id: u32,
        pub created_at: DateTime,
        /// Lifetime in milliseconds as revised by the server
        pub revised_lifetime: u32,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct OpenSecureChannelRequest {
        pub request_header: RequestHeader,
        pub client_protocol_version: u32,
        pub request_type: SecurityTokenRequestType,
        pub security_mode: MessageSecurityMode,
        pub client_nonce: ByteString,
        pub requested_lifetime: u32,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct OpenSecureChannelResponse {
        pub response_header: ResponseHeader,
        pub server_protocol_version: u32,
        pub security_token: ChannelSecurityToken,
        pub server_nonce: ByteString,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CloseSecureChannelRequest {
        pub request_header: RequestHeader,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct CloseSecureChannelResponse {
        pub response_header: ResponseHeader,
    }
}
