//! User identity tokens

use opcua_core::{binary_struct, BinaryEncodingId, ByteString};

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct AnonymousIdentityToken {
        pub policy_id: String,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct UserNameIdentityToken {
        pub policy_id: String,
        pub user_name: String,
        /// Password, encrypted with `encryption_algorithm` when one is named
        pub password: ByteString,
        pub encryption_algorithm: String,
    }
}

impl BinaryEncodingId for AnonymousIdentityToken {
    const BINARY_ENCODING_ID: u32 = 321;
}

impl BinaryEncodingId for UserNameIdentityToken {
    const BINARY_ENCODING_ID: u32 = 324;
}
