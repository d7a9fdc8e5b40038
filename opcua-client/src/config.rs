//! Client configuration
//!
//! [`ClientConfig`] collects every tunable of the client: endpoint and
//! application description, session and request timeouts, keep-alive,
//! publishing, secure channel and reconnection settings. It can be loaded
//! from TOML, where durations are written in milliseconds:
//!
//! ```toml
//! endpoint_url = "opc.tcp://plc.local:4840"
//! application_name = "line monitor"
//! request_timeout = 5000
//!
//! [channel]
//! security_policy = "None"
//! requested_lifetime = 600000
//!
//! [reconnect]
//! initial_delay = 500
//! max_attempts = 5
//!
//! [identity]
//! type = "user_name"
//! user_name = "operator"
//! password = "secret"
//! ```

use opcua_channel::{ChannelConfig, TransportLimits};
use opcua_core::{UaError, UaResult};
use opcua_security::{AsymmetricSecurity, SecurityPolicy};
use opcua_service::MessageSecurityMode;
use opcua_transport::EndpointUrl;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Durations serialized as integer milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }

    pub(super) mod option {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub(in super::super) fn serialize<S>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            duration
                .map(|d| d.as_millis() as u64)
                .serialize(serializer)
        }

        pub(in super::super) fn deserialize<'de, D>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let millis = Option::<u64>::deserialize(deserializer)?;
            Ok(millis.map(Duration::from_millis))
        }
    }
}

/// Message security mode as written in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    #[default]
    None,
    Sign,
    SignAndEncrypt,
}

impl From<SecurityMode> for MessageSecurityMode {
    fn from(mode: SecurityMode) -> Self {
        match mode {
            SecurityMode::None => MessageSecurityMode::None,
            SecurityMode::Sign => MessageSecurityMode::Sign,
            SecurityMode::SignAndEncrypt => MessageSecurityMode::SignAndEncrypt,
        }
    }
}

/// Secure channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Short policy name (`Basic256Sha256`) or full policy URI
    pub security_policy: String,
    pub security_mode: SecurityMode,
    #[serde(with = "duration_ms")]
    pub requested_lifetime: Duration,
    /// Renew this long before token expiry; a quarter of the lifetime if unset
    #[serde(with = "duration_ms::option")]
    pub renew_margin: Option<Duration>,
    #[serde(with = "duration_ms")]
    pub handshake_timeout: Duration,
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    /// 0 for no limit
    pub max_message_size: u32,
    /// 0 for no limit
    pub max_chunk_count: u32,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        let limits = TransportLimits::default();
        Self {
            security_policy: SecurityPolicy::None.to_string(),
            security_mode: SecurityMode::None,
            requested_lifetime: Duration::from_secs(3600),
            renew_margin: None,
            handshake_timeout: Duration::from_secs(10),
            receive_buffer_size: limits.receive_buffer_size,
            send_buffer_size: limits.send_buffer_size,
            max_message_size: limits.max_message_size,
            max_chunk_count: limits.max_chunk_count,
        }
    }
}

impl ChannelSettings {
    pub fn policy(&self) -> UaResult<SecurityPolicy> {
        self.security_policy
            .parse()
            .map_err(|_| UaError::Config(format!("unknown security policy {:?}", self.security_policy)))
    }

    /// Build the channel configuration, attaching the asymmetric security
    /// implementation required by secured policies
    pub fn channel_config(
        &self,
        asymmetric: Option<Arc<dyn AsymmetricSecurity>>,
    ) -> UaResult<ChannelConfig> {
        let config = ChannelConfig {
            security_policy: self.policy()?,
            security_mode: self.security_mode.into(),
            requested_lifetime: self.requested_lifetime,
            renew_margin: self.renew_margin,
            limits: TransportLimits {
                receive_buffer_size: self.receive_buffer_size,
                send_buffer_size: self.send_buffer_size,
                max_message_size: self.max_message_size,
                max_chunk_count: self.max_chunk_count,
            },
            handshake_timeout: self.handshake_timeout,
            asymmetric,
        };
        Ok(config)
    }
}

/// Publish pool settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSettings {
    /// Upper bound on outstanding publish requests
    pub max_pending_publish_requests: usize,
    /// Subscriptions turn Late when fewer publish requests are outstanding
    pub late_publish_threshold: usize,
    /// A subscription silent for this many keep-alive periods is reported
    /// through `on_watchdog_timeout`; 0 disables the watchdog
    pub watchdog_multiplier: f64,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            max_pending_publish_requests: 10,
            late_publish_threshold: 1,
            watchdog_multiplier: 2.0,
        }
    }
}

/// Reconnection backoff and budget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    pub multiplier: f64,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Fraction of each delay randomized, between 0.0 and 1.0
    pub jitter: f64,
    /// Attempts before giving up; `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(16),
            jitter: 0.0,
            max_attempts: Some(10),
        }
    }
}

/// User identity presented on activation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IdentityConfig {
    #[default]
    Anonymous,
    UserName { user_name: String, password: String },
}

/// Complete client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub endpoint_url: String,
    pub application_name: String,
    pub application_uri: String,
    pub product_uri: String,
    pub session_name: String,
    #[serde(with = "duration_ms")]
    pub session_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub keep_alive_interval: Duration,
    /// Consecutive keep-alive failures tolerated before the session counts as lost
    pub keep_alive_failures_allowed: u32,
    pub publish: PublishSettings,
    pub channel: ChannelSettings,
    pub reconnect: ReconnectConfig,
    pub identity: IdentityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "opc.tcp://localhost:4840".to_string(),
            application_name: "opcua-rs client".to_string(),
            application_uri: "urn:opcua-rs:client".to_string(),
            product_uri: "urn:opcua-rs".to_string(),
            session_name: "opcua-rs session".to_string(),
            session_timeout: Duration::from_secs(120),
            request_timeout: Duration::from_secs(60),
            keep_alive_interval: Duration::from_secs(5),
            keep_alive_failures_allowed: 1,
            publish: PublishSettings::default(),
            channel: ChannelSettings::default(),
            reconnect: ReconnectConfig::default(),
            identity: IdentityConfig::Anonymous,
        }
    }
}

impl ClientConfig {
    pub fn builder(endpoint_url: impl Into<String>) -> ClientConfigBuilder {
        ClientConfigBuilder::new(endpoint_url)
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    ///
    /// Returns `UaError::Config` if the document is malformed or the values
    /// are inconsistent.
    pub fn from_toml_str(text: &str) -> UaResult<Self> {
        let config: ClientConfig = toml::from_str(text)
            .map_err(|e| UaError::Config(format!("invalid client configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> UaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            UaError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        log::debug!("Loading client configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> UaResult<String> {
        toml::to_string(self)
            .map_err(|e| UaError::Config(format!("cannot serialize configuration: {}", e)))
    }

    /// Check the configuration for inconsistent values
    pub fn validate(&self) -> UaResult<()> {
        self.endpoint_url.parse::<EndpointUrl>()?;
        let policy = self.channel.policy()?;
        match (policy.is_none(), self.channel.security_mode) {
            (true, SecurityMode::None) | (false, SecurityMode::Sign | SecurityMode::SignAndEncrypt) => {}
            (true, mode) => {
                return Err(UaError::Config(format!(
                    "security mode {:?} requires a security policy",
                    mode
                )));
            }
            (false, SecurityMode::None) => {
                return Err(UaError::Config(format!(
                    "security policy {} requires mode Sign or SignAndEncrypt",
                    policy
                )));
            }
        }
        if self.channel.requested_lifetime.is_zero() {
            return Err(UaError::Config("requested token lifetime is zero".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(UaError::Config("request timeout is zero".to_string()));
        }
        if self.session_timeout.is_zero() {
            return Err(UaError::Config("session timeout is zero".to_string()));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(UaError::Config("keep-alive interval is zero".to_string()));
        }
        if self.publish.max_pending_publish_requests == 0 {
            return Err(UaError::Config(
                "max_pending_publish_requests must be at least 1".to_string(),
            ));
        }
        let watchdog = self.publish.watchdog_multiplier;
        if watchdog < 0.0 || !watchdog.is_finite() {
            return Err(UaError::Config(format!("watchdog multiplier {} is negative", watchdog)));
        }
        let reconnect = &self.reconnect;
        if reconnect.multiplier < 1.0 || !reconnect.multiplier.is_finite() {
            return Err(UaError::Config(format!(
                "reconnect multiplier {} is below 1.0",
                reconnect.multiplier
            )));
        }
        if reconnect.max_delay < reconnect.initial_delay {
            return Err(UaError::Config(
                "reconnect max_delay is shorter than initial_delay".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            return Err(UaError::Config(format!(
                "reconnect jitter {} outside 0.0..=1.0",
                reconnect.jitter
            )));
        }
        if reconnect.max_attempts == Some(0) {
            return Err(UaError::Config("reconnect max_attempts is zero".to_string()));
        }
        if let IdentityConfig::UserName { user_name, .. } = &self.identity {
            if user_name.is_empty() {
                return Err(UaError::Config("user name is empty".to_string()));
            }
        }
        Ok(())
    }
}

/// Fluent construction of a [`ClientConfig`]
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            config: ClientConfig {
                endpoint_url: endpoint_url.into(),
                ..Default::default()
            },
        }
    }

    pub fn application(mut self, name: impl Into<String>, uri: impl Into<String>) -> Self {
        self.config.application_name = name.into();
        self.config.application_uri = uri.into();
        self
    }

    pub fn product_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.product_uri = uri.into();
        self
    }

    pub fn session_name(mut self, name: impl Into<String>) -> Self {
        self.config.session_name = name.into();
        self
    }

    pub fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn keep_alive(mut self, interval: Duration, failures_allowed: u32) -> Self {
        self.config.keep_alive_interval = interval;
        self.config.keep_alive_failures_allowed = failures_allowed;
        self
    }

    pub fn watchdog_multiplier(mut self, multiplier: f64) -> Self {
        self.config.publish.watchdog_multiplier = multiplier;
        self
    }

    pub fn max_pending_publish_requests(mut self, max: usize) -> Self {
        self.config.publish.max_pending_publish_requests = max;
        self
    }

    pub fn security(mut self, policy: SecurityPolicy, mode: SecurityMode) -> Self {
        self.config.channel.security_policy = policy.to_string();
        self.config.channel.security_mode = mode;
        self
    }

    pub fn token_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.channel.requested_lifetime = lifetime;
        self
    }

    pub fn renew_margin(mut self, margin: Duration) -> Self {
        self.config.channel.renew_margin = Some(margin);
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: Option<u32>) -> Self {
        self.config.reconnect.max_attempts = attempts;
        self
    }

    pub fn user_name(mut self, user_name: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.identity = IdentityConfig::UserName {
            user_name: user_name.into(),
            password: password.into(),
        };
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> UaResult<ClientConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session_timeout, Duration::from_secs(120));
        assert_eq!(config.reconnect.max_attempts, Some(10));
    }

    #[test]
    fn test_from_toml() {
        let text = r#"
            endpoint_url = "opc.tcp://plc.local:4841/ua"
            request_timeout = 5000

            [channel]
            requested_lifetime = 60000
            renew_margin = 10000

            [reconnect]
            initial_delay = 250
            max_attempts = 5

            [identity]
            type = "user_name"
            user_name = "operator"
            password = "secret"
        "#;
        let config = ClientConfig::from_toml_str(text).unwrap();
        assert_eq!(config.endpoint_url, "opc.tcp://plc.local:4841/ua");
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        assert_eq!(config.channel.renew_margin, Some(Duration::from_secs(10)));
        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.max_attempts, Some(5));
        // Unspecified values keep their defaults
        assert_eq!(config.reconnect.multiplier, 2.0);
        assert_eq!(config.publish.watchdog_multiplier, 2.0);
        assert_eq!(
            config.identity,
            IdentityConfig::UserName {
                user_name: "operator".to_string(),
                password: "secret".to_string()
            }
        );

        let channel = config.channel.channel_config(None).unwrap();
        assert_eq!(channel.requested_lifetime, Duration::from_secs(60));
        assert_eq!(
            channel.renew_margin_for(Duration::from_secs(60)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_toml_text_survives_serialization() {
        let config = ClientConfig::builder("opc.tcp://10.0.0.5:4840")
            .request_timeout(Duration::from_millis(1500))
            .build()
            .unwrap();
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("request_timeout = 1500"));
        assert_eq!(ClientConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(ClientConfig::from_toml_str("endpoint_url = \"http://x\"").is_err());
        assert!(ClientConfig::from_toml_str("request_timeout = \"soon\"").is_err());

        let secured_without_mode = ClientConfig::builder("opc.tcp://h:4840")
            .security(SecurityPolicy::Basic256Sha256, SecurityMode::None)
            .build();
        assert!(matches!(secured_without_mode, Err(UaError::Config(_))));

        let mut config = ClientConfig::default();
        config.reconnect.max_delay = Duration::from_millis(10);
        assert!(config.validate().is_err());

        let mut config = ClientConfig::default();
        config.channel.security_policy = "Basic128Rsa15".to_string();
        assert!(config.validate().is_err());

        let negative_watchdog = ClientConfig::builder("opc.tcp://h:4840").watchdog_multiplier(-1.0).build();
        assert!(matches!(negative_watchdog, Err(UaError::Config(_))));
        let disabled = ClientConfig::builder("opc.tcp://h:4840").watchdog_multiplier(0.0).build();
        assert!(disabled.is_ok());
    }
}
