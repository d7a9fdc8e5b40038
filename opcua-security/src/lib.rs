//! Security layer for the OPC-UA secure channel
//!
//! Provides the supported security policies, nonce generation, P_SHA256 key
//! derivation and the symmetric (HMAC-SHA256 / AES-CBC) protection applied
//! to MSG and CLO chunks. Asymmetric protection of OpenSecureChannel needs
//! certificates and RSA, and is plugged in through [`AsymmetricSecurity`].

pub mod asymmetric;
pub mod keys;
pub mod nonce;
pub mod policy;
pub mod symmetric;

pub use asymmetric::AsymmetricSecurity;
pub use keys::{ChannelKeys, SymmetricKeys, p_sha256};
pub use nonce::generate_nonce;
pub use policy::SecurityPolicy;
pub use symmetric::SymmetricSecurity;
