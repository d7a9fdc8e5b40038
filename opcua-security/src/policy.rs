//! Security policies

use opcua_core::{UaError, UaResult};
use std::fmt;
use std::str::FromStr;

/// Supported security policies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityPolicy {
    #[default]
    None,
    Basic256Sha256,
    Aes128Sha256RsaOaep,
    Aes256Sha256RsaPss,
}

impl SecurityPolicy {
    pub const fn uri(&self) -> &'static str {
        match self {
            SecurityPolicy::None => "http://opcfoundation.org/UA/SecurityPolicy#None",
            SecurityPolicy::Basic256Sha256 => {
                "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256"
            }
            SecurityPolicy::Aes128Sha256RsaOaep => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes128_Sha256_RsaOaep"
            }
            SecurityPolicy::Aes256Sha256RsaPss => {
                "http://opcfoundation.org/UA/SecurityPolicy#Aes256_Sha256_RsaPss"
            }
        }
    }

    pub fn from_uri(uri: &str) -> UaResult<Self> {
        [
            SecurityPolicy::None,
            SecurityPolicy::Basic256Sha256,
            SecurityPolicy::Aes128Sha256RsaOaep,
            SecurityPolicy::Aes256Sha256RsaPss,
        ]
        .into_iter()
        .find(|policy| policy.uri() == uri)
        .ok_or_else(|| UaError::Security(format!("unsupported security policy {}", uri)))
    }

    pub const fn is_none(&self) -> bool {
        matches!(self, SecurityPolicy::None)
    }

    /// Length of the HMAC-SHA256 symmetric signature
    pub const fn symmetric_signature_length(&self) -> usize {
        if self.is_none() { 0 } else { 32 }
    }

    pub const fn signing_key_length(&self) -> usize {
        if self.is_none() { 0 } else { 32 }
    }

    pub const fn encryption_key_length(&self) -> usize {
        match self {
            SecurityPolicy::None => 0,
            SecurityPolicy::Aes128Sha256RsaOaep => 16,
            SecurityPolicy::Basic256Sha256 | SecurityPolicy::Aes256Sha256RsaPss => 32,
        }
    }

    /// AES block size, also the IV length
    pub const fn encryption_block_size(&self) -> usize {
        if self.is_none() { 1 } else { 16 }
    }

    /// Length of the nonces exchanged in OpenSecureChannel
    pub const fn nonce_length(&self) -> usize {
        if self.is_none() { 0 } else { 32 }
    }
}

impl fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityPolicy::None => "None",
            SecurityPolicy::Basic256Sha256 => "Basic256Sha256",
            SecurityPolicy::Aes128Sha256RsaOaep => "Aes128_Sha256_RsaOaep",
            SecurityPolicy::Aes256Sha256RsaPss => "Aes256_Sha256_RsaPss",
        };
        f.write_str(name)
    }
}

impl FromStr for SecurityPolicy {
    type Err = UaError;

    /// Accepts either the short name or the full policy URI
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(SecurityPolicy::None),
            "Basic256Sha256" => Ok(SecurityPolicy::Basic256Sha256),
            "Aes128_Sha256_RsaOaep" => Ok(SecurityPolicy::Aes128Sha256RsaOaep),
            "Aes256_Sha256_RsaPss" => Ok(SecurityPolicy::Aes256Sha256RsaPss),
            uri => Self::from_uri(uri),
        }
    }
}
