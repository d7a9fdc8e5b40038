//! Secure channel configuration

use crate::hello::TransportLimits;
use opcua_core::{UaError, UaResult};
use opcua_security::{AsymmetricSecurity, SecurityPolicy};
use opcua_service::MessageSecurityMode;
use std::sync::Arc;
use std::time::Duration;

/// Settings for opening a [`SecureChannel`](crate::SecureChannel)
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub security_policy: SecurityPolicy,
    pub security_mode: MessageSecurityMode,
    /// Token lifetime requested in OpenSecureChannel; the server may revise it
    pub requested_lifetime: Duration,
    /// Time before token expiry at which renewal starts.
    /// `None` renews after 75% of the revised lifetime.
    pub renew_margin: Option<Duration>,
    pub limits: TransportLimits,
    /// Timeout of the Hello/Acknowledge exchange and the first OpenSecureChannel
    pub handshake_timeout: Duration,
    /// Required for any policy other than `None`
    pub asymmetric: Option<Arc<dyn AsymmetricSecurity>>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            security_policy: SecurityPolicy::None,
            security_mode: MessageSecurityMode::None,
            requested_lifetime: Duration::from_secs(3600),
            renew_margin: None,
            limits: TransportLimits::default(),
            handshake_timeout: Duration::from_secs(10),
            asymmetric: None,
        }
    }
}

impl ChannelConfig {
    pub fn with_security(
        mut self,
        policy: SecurityPolicy,
        mode: MessageSecurityMode,
        asymmetric: Arc<dyn AsymmetricSecurity>,
    ) -> Self {
        self.security_policy = policy;
        self.security_mode = mode;
        self.asymmetric = Some(asymmetric);
        self
    }

    pub fn with_requested_lifetime(mut self, lifetime: Duration) -> Self {
        self.requested_lifetime = lifetime;
        self
    }

    pub fn with_renew_margin(mut self, margin: Duration) -> Self {
        self.renew_margin = Some(margin);
        self
    }

    /// Margin applied to a token of the given lifetime
    pub fn renew_margin_for(&self, lifetime: Duration) -> Duration {
        self.renew_margin.unwrap_or(lifetime / 4).min(lifetime)
    }

    /// Check policy, mode and asymmetric security agree
    ///
    /// # Errors
    ///
    /// Returns `UaError::Config` describing the first inconsistency.
    pub fn validate(&self) -> UaResult<()> {
        self.limits.validate()?;
        match (self.security_policy.is_none(), self.security_mode) {
            (_, MessageSecurityMode::Invalid) => {
                return Err(UaError::Config("security mode Invalid".to_string()));
            }
            (true, MessageSecurityMode::None) => {}
            (true, mode) => {
                return Err(UaError::Config(format!(
                    "security mode {:?} requires a security policy",
                    mode
                )));
            }
            (false, MessageSecurityMode::None) => {
                return Err(UaError::Config(format!(
                    "security policy {} requires mode Sign or SignAndEncrypt",
                    self.security_policy
                )));
            }
            (false, _) => match &self.asymmetric {
                None => {
                    return Err(UaError::Config(format!(
                        "security policy {} requires asymmetric security",
                        self.security_policy
                    )));
                }
                Some(asymmetric) if asymmetric.policy() != self.security_policy => {
                    return Err(UaError::Config(format!(
                        "asymmetric security implements {}, channel uses {}",
                        asymmetric.policy(),
                        self.security_policy
                    )));
                }
                Some(_) => {}
            },
        }
        if self.requested_lifetime.is_zero() {
            return Err(UaError::Config("requested token lifetime is zero".to_string()));
        }
        Ok(())
    }

    pub(crate) fn requested_lifetime_millis(&self) -> u32 {
        self.requested_lifetime.as_millis().min(u32::MAX as u128) as u32
    }
}
