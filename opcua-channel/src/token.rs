//! Security tokens of a secure channel
//!
//! After a renewal the previous token stays valid for decoding until the
//! server sends a message secured with the new token, or until the previous
//! token expires.

use opcua_core::{UaError, UaResult};
use opcua_security::SymmetricSecurity;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One issued token and the keys derived for it
#[derive(Debug, Clone)]
pub struct SecurityToken {
    pub channel_id: u32,
    pub token_id: u32,
    /// Local time the token was received
    pub created_at: Instant,
    /// Lifetime as revised by the server
    pub lifetime: Duration,
    /// `None` for the `None` security policy
    pub security: Option<Arc<SymmetricSecurity>>,
}

impl SecurityToken {
    pub fn expires_at(&self) -> Instant {
        self.created_at + self.lifetime
    }

    /// Instant renewal should start, `margin` before expiry
    pub fn renew_at(&self, margin: Duration) -> Instant {
        self.created_at + self.lifetime.saturating_sub(margin)
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at()
    }
}

#[derive(Debug)]
pub struct TokenSet {
    current: SecurityToken,
    previous: Option<SecurityToken>,
    renewing: bool,
}

impl TokenSet {
    pub fn new(token: SecurityToken) -> Self {
        Self {
            current: token,
            previous: None,
            renewing: false,
        }
    }

    pub fn current(&self) -> &SecurityToken {
        &self.current
    }

    pub fn previous(&self) -> Option<&SecurityToken> {
        self.previous.as_ref()
    }

    pub fn is_renewing(&self) -> bool {
        self.renewing
    }

    pub fn set_renewing(&mut self, renewing: bool) {
        self.renewing = renewing;
    }

    /// Make `token` current; the replaced token remains acceptable for decoding
    pub fn install(&mut self, token: SecurityToken) {
        let replaced = std::mem::replace(&mut self.current, token);
        self.previous = Some(replaced);
        self.renewing = false;
    }

    /// Protection to remove from a chunk secured with `token_id`
    ///
    /// A chunk under the current token retires the previous one.
    ///
    /// # Errors
    ///
    /// Returns `UaError::Security` for an unknown token id or an expired
    /// previous token.
    pub fn for_receive(
        &mut self,
        token_id: u32,
        now: Instant,
    ) -> UaResult<Option<Arc<SymmetricSecurity>>> {
        if token_id == self.current.token_id {
            if let Some(previous) = self.previous.take() {
                log::debug!(
                    "Server switched to token {}, retiring token {}",
                    token_id,
                    previous.token_id
                );
            }
            return Ok(self.current.security.clone());
        }
        match &self.previous {
            Some(previous) if previous.token_id == token_id => {
                if previous.is_expired(now) {
                    self.previous = None;
                    Err(UaError::Security(format!("security token {} expired", token_id)))
                } else {
                    Ok(previous.security.clone())
                }
            }
            _ => Err(UaError::Security(format!("unknown security token {}", token_id))),
        }
    }
}
