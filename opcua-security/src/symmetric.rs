//! Symmetric message security (HMAC-SHA256 signatures, AES-CBC encryption)

use crate::keys::ChannelKeys;
use crate::policy::SecurityPolicy;
use aes::{Aes128, Aes256};
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use opcua_core::{UaError, UaResult};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

enum AesCipher {
    Aes128(Aes128),
    Aes256(Aes256),
}

impl AesCipher {
    fn new(key: &[u8]) -> UaResult<Self> {
        let invalid = |_| UaError::Security(format!("invalid AES key length {}", key.len()));
        match key.len() {
            16 => Aes128::new_from_slice(key).map(AesCipher::Aes128).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(AesCipher::Aes256).map_err(invalid),
            n => Err(UaError::Security(format!("invalid AES key length {}", n))),
        }
    }

    fn encrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            AesCipher::Aes128(c) => c.encrypt_block(block),
            AesCipher::Aes256(c) => c.encrypt_block(block),
        }
    }

    fn decrypt_block(&self, block: &mut [u8]) {
        let block = GenericArray::from_mut_slice(block);
        match self {
            AesCipher::Aes128(c) => c.decrypt_block(block),
            AesCipher::Aes256(c) => c.decrypt_block(block),
        }
    }
}

const BLOCK: usize = 16;

/// Symmetric protection for one security token
pub struct SymmetricSecurity {
    policy: SecurityPolicy,
    encrypt: bool,
    keys: ChannelKeys,
    local_cipher: Option<AesCipher>,
    remote_cipher: Option<AesCipher>,
}

impl fmt::Debug for SymmetricSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymmetricSecurity")
            .field("policy", &self.policy)
            .field("encrypt", &self.encrypt)
            .finish()
    }
}

impl SymmetricSecurity {
    /// Create the protection for a token
    ///
    /// # Arguments
    ///
    /// * `policy` - Negotiated security policy, not `None`
    /// * `encrypt` - Whether messages are encrypted as well as signed
    /// * `keys` - Keys derived from the token's nonces
    pub fn new(policy: SecurityPolicy, encrypt: bool, keys: ChannelKeys) -> UaResult<Self> {
        if policy.is_none() {
            return Err(UaError::Security(
                "symmetric security requires a security policy".to_string(),
            ));
        }
        let (local_cipher, remote_cipher) = if encrypt {
            (
                Some(AesCipher::new(&keys.local.encryption_key)?),
                Some(AesCipher::new(&keys.remote.encryption_key)?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            policy,
            encrypt,
            keys,
            local_cipher,
            remote_cipher,
        })
    }

    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    pub fn is_encrypting(&self) -> bool {
        self.encrypt
    }

    pub fn signature_length(&self) -> usize {
        self.policy.symmetric_signature_length()
    }

    /// Block size the encrypted part must align to (1 when only signing)
    pub fn block_size(&self) -> usize {
        if self.encrypt { BLOCK } else { 1 }
    }

    /// Sign with the local signing key
    pub fn sign(&self, data: &[u8]) -> UaResult<Vec<u8>> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.keys.local.signing_key)
            .map_err(|e| UaError::Security(format!("invalid signing key: {}", e)))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Verify a peer signature with the remote signing key
    ///
    /// # Errors
    ///
    /// Returns `UaError::Security` if the signature does not match.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> UaResult<()> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.keys.remote.signing_key)
            .map_err(|e| UaError::Security(format!("invalid signing key: {}", e)))?;
        mac.update(data);
        mac.verify_slice(signature)
            .map_err(|_| UaError::Security("signature verification failed".to_string()))
    }

    /// Padding appended before the signature so that the encrypted part
    /// (`plain_len` bytes plus padding plus signature) is block aligned
    ///
    /// Every padding byte, the size byte included, holds the padding size.
    pub fn padding(&self, plain_len: usize) -> Vec<u8> {
        if !self.encrypt {
            return Vec::new();
        }
        let unpadded = plain_len + 1 + self.signature_length();
        let size = (BLOCK - unpadded % BLOCK) % BLOCK;
        vec![size as u8; size + 1]
    }

    /// Length of `plain` without its trailing padding
    ///
    /// # Errors
    ///
    /// Returns `UaError::Security` if the padding is malformed.
    pub fn strip_padding(&self, plain: &[u8]) -> UaResult<usize> {
        if !self.encrypt {
            return Ok(plain.len());
        }
        let size = *plain
            .last()
            .ok_or_else(|| UaError::Security("missing padding".to_string()))? as usize;
        if size + 1 > plain.len() {
            return Err(UaError::Security("padding exceeds message".to_string()));
        }
        let start = plain.len() - size - 1;
        if plain[start..].iter().any(|b| *b as usize != size) {
            return Err(UaError::Security("invalid padding".to_string()));
        }
        Ok(start)
    }

    /// Encrypt `data` in place with the local key (AES-CBC)
    pub fn encrypt(&self, data: &mut [u8]) -> UaResult<()> {
        let cipher = self
            .local_cipher
            .as_ref()
            .ok_or_else(|| UaError::Security("channel is not encrypting".to_string()))?;
        check_aligned(data.len())?;
        let mut previous = [0u8; BLOCK];
        previous.copy_from_slice(&self.keys.local.iv[..BLOCK]);
        for block in data.chunks_exact_mut(BLOCK) {
            block.iter_mut().zip(previous.iter()).for_each(|(b, p)| *b ^= p);
            cipher.encrypt_block(block);
            previous.copy_from_slice(block);
        }
        Ok(())
    }

    /// Decrypt `data` in place with the remote key (AES-CBC)
    pub fn decrypt(&self, data: &mut [u8]) -> UaResult<()> {
        let cipher = self
            .remote_cipher
            .as_ref()
            .ok_or_else(|| UaError::Security("channel is not encrypting".to_string()))?;
        check_aligned(data.len())?;
        let mut previous = [0u8; BLOCK];
        previous.copy_from_slice(&self.keys.remote.iv[..BLOCK]);
        for block in data.chunks_exact_mut(BLOCK) {
            let mut ciphertext = [0u8; BLOCK];
            ciphertext.copy_from_slice(block);
            cipher.decrypt_block(block);
            block.iter_mut().zip(previous.iter()).for_each(|(b, p)| *b ^= p);
            previous = ciphertext;
        }
        Ok(())
    }
}

fn check_aligned(len: usize) -> UaResult<()> {
    if len % BLOCK != 0 {
        return Err(UaError::Security(format!(
            "encrypted length {} is not a multiple of {}",
            len, BLOCK
        )));
    }
    Ok(())
}
