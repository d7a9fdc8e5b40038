//! Symmetric key derivation (P_SHA256)

use crate::policy::SecurityPolicy;
use hmac::{Hmac, Mac};
use opcua_core::{UaError, UaResult};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn hmac_sha256(secret: &[u8], parts: &[&[u8]]) -> UaResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| UaError::Security(format!("invalid HMAC key: {}", e)))?;
    for part in parts {
        mac.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// P_SHA256 pseudo-random function (RFC 5246 section 5)
///
/// # Arguments
///
/// * `secret` - HMAC key
/// * `seed` - Seed mixed into every iteration
/// * `length` - Number of bytes to produce
pub fn p_sha256(secret: &[u8], seed: &[u8], length: usize) -> UaResult<Vec<u8>> {
    let mut output = Vec::with_capacity(length + 32);
    let mut a = hmac_sha256(secret, &[seed])?;
    while output.len() < length {
        output.extend_from_slice(&hmac_sha256(secret, &[&a, seed])?);
        a = hmac_sha256(secret, &[&a])?;
    }
    output.truncate(length);
    Ok(output)
}

/// Keys protecting one direction of a channel
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKeys {
    pub signing_key: Vec<u8>,
    pub encryption_key: Vec<u8>,
    pub iv: Vec<u8>,
}

impl std::fmt::Debug for SymmetricKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricKeys")
            .field("signing_key", &format_args!("[{} bytes]", self.signing_key.len()))
            .field("encryption_key", &format_args!("[{} bytes]", self.encryption_key.len()))
            .finish()
    }
}

impl SymmetricKeys {
    /// Split P_SHA256(secret, seed) into signing key, encryption key and IV
    pub fn derive(policy: SecurityPolicy, secret: &[u8], seed: &[u8]) -> UaResult<Self> {
        let sign_len = policy.signing_key_length();
        let enc_len = policy.encryption_key_length();
        let iv_len = policy.encryption_block_size();
        let material = p_sha256(secret, seed, sign_len + enc_len + iv_len)?;
        Ok(Self {
            signing_key: material[..sign_len].to_vec(),
            encryption_key: material[sign_len..sign_len + enc_len].to_vec(),
            iv: material[sign_len + enc_len..].to_vec(),
        })
    }
}

/// Keys for both directions of one security token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelKeys {
    /// Protects messages this side sends
    pub local: SymmetricKeys,
    /// Verifies messages the peer sends
    pub remote: SymmetricKeys,
}

impl ChannelKeys {
    /// Derive both key sets from the exchanged nonces
    ///
    /// Keys protecting a side's messages use the peer's nonce as secret and
    /// the side's own nonce as seed.
    pub fn derive(policy: SecurityPolicy, local_nonce: &[u8], remote_nonce: &[u8]) -> UaResult<Self> {
        if local_nonce.len() < policy.nonce_length() || remote_nonce.len() < policy.nonce_length() {
            return Err(UaError::Security(format!(
                "nonce shorter than {} bytes",
                policy.nonce_length()
            )));
        }
        Ok(Self {
            local: SymmetricKeys::derive(policy, remote_nonce, local_nonce)?,
            remote: SymmetricKeys::derive(policy, local_nonce, remote_nonce)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_block_matches_definition() {
        let secret = b"server nonce";
        let seed = b"client nonce";
        let a1 = hmac_sha256(secret, &[seed]).unwrap();
        let expected = hmac_sha256(secret, &[&a1, seed]).unwrap();
        assert_eq!(p_sha256(secret, seed, 32).unwrap(), expected.to_vec());
    }

    #[test]
    fn test_longer_output_extends_shorter() {
        let short = p_sha256(b"k", b"s", 20).unwrap();
        let long = p_sha256(b"k", b"s", 80).unwrap();
        assert_eq!(long.len(), 80);
        assert_eq!(&long[..20], &short[..]);
    }

    #[test]
    fn test_directions_mirror_each_other() {
        let policy = SecurityPolicy::Basic256Sha256;
        let client_nonce = [1u8; 32];
        let server_nonce = [2u8; 32];
        let client = ChannelKeys::derive(policy, &client_nonce, &server_nonce).unwrap();
        let server = ChannelKeys::derive(policy, &server_nonce, &client_nonce).unwrap();
        assert_eq!(client.local, server.remote);
        assert_eq!(client.remote, server.local);
        assert_ne!(client.local, client.remote);
        assert_eq!(client.local.signing_key.len(), 32);
        assert_eq!(client.local.encryption_key.len(), 32);
        assert_eq!(client.local.iv.len(), 16);
    }

    #[test]
    fn test_short_nonce_rejected() {
        assert!(ChannelKeys::derive(SecurityPolicy::Basic256Sha256, &[0; 8], &[0; 32]).is_err());
    }
}
