//! Asymmetric protection of OpenSecureChannel chunks
//!
//! Certificates and RSA are outside this workspace; an application using a
//! security policy other than `None` supplies an implementation.

use crate::policy::SecurityPolicy;
use opcua_core::UaResult;
use std::fmt::Debug;

/// Application-supplied certificate handling and RSA operations
pub trait AsymmetricSecurity: Send + Sync + Debug {
    /// Policy the implementation protects messages with
    fn policy(&self) -> SecurityPolicy;

    /// DER-encoded local application instance certificate
    fn local_certificate(&self) -> Vec<u8>;

    /// SHA-1 thumbprint of the server certificate
    fn remote_certificate_thumbprint(&self) -> Vec<u8>;

    /// Check the server certificate received in the OpenSecureChannel response
    fn validate_remote_certificate(&self, certificate: &[u8]) -> UaResult<()> {
        let _ = certificate;
        Ok(())
    }

    /// Sign and encrypt a complete OPN chunk
    ///
    /// # Arguments
    ///
    /// * `chunk` - Plaintext chunk: message header, asymmetric security header,
    ///   sequence header and body. The message size field is patched by the
    ///   implementation.
    /// * `header_len` - Length of the unencrypted prefix (message header and
    ///   security header)
    fn seal(&self, chunk: Vec<u8>, header_len: usize) -> UaResult<Vec<u8>>;

    /// Decrypt and verify a received OPN chunk, returning it without padding
    /// and signature
    fn unseal(&self, chunk: Vec<u8>, header_len: usize) -> UaResult<Vec<u8>>;
}
