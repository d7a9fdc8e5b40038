//! Application and endpoint descriptions exchanged during session creation

use crate::service::secure_channel::MessageSecurityMode;
use opcua_core::{binary_enum, binary_struct, ByteString, LocalizedText};

binary_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum ApplicationType {
        Server = 0,
        #[default]
        Client = 1,
        ClientAndServer = 2,
        DiscoveryServer = 3,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ApplicationDescription {
        pub application_uri: String,
        pub product_uri: String,
        pub application_name: LocalizedText,
        pub application_type: ApplicationType,
        pub gateway_server_uri: String,
        pub discovery_profile_uri: String,
        pub discovery_urls: Vec<String>,
    }
}

binary_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum UserTokenType {
        #[default]
        Anonymous = 0,
        UserName = 1,
        Certificate = 2,
        IssuedToken = 3,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct UserTokenPolicy {
        pub policy_id: String,
        pub token_type: UserTokenType,
        pub issued_token_type: String,
        pub issuer_endpoint_url: String,
        pub security_policy_uri: String,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct EndpointDescription {
        pub endpoint_url: String,
        pub server: ApplicationDescription,
        pub server_certificate: ByteString,
        pub security_mode: MessageSecurityMode,
        pub security_policy_uri: String,
        pub user_identity_tokens: Vec<UserTokenPolicy>,
        pub transport_profile_uri: String,
        pub security_level: u8,
    }
}

impl EndpointDescription {
    /// First user token policy of the given type
    pub fn find_user_token_policy(&self, token_type: UserTokenType) -> Option<&UserTokenPolicy> {
        self.user_identity_tokens
            .iter()
            .find(|policy| policy.token_type == token_type)
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct SignedSoftwareCertificate {
        pub certificate_data: ByteString,
        pub signature: ByteString,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct SignatureData {
        pub algorithm: String,
        pub signature: ByteString,
    }
}
