//! Reconnection with exponential backoff
//!
//! ```text
//!   Connecting ──> Connected ──loss──> Reconnecting ──> Connected
//!                                          │
//!                                          └──budget spent──> Failed
//! ```
//!
//! The controller only schedules attempts. What an attempt does (open a
//! channel, transfer or recreate the session, restore subscriptions) is
//! supplied by a [`ReconnectTarget`].

use crate::config::ReconnectConfig;
use async_trait::async_trait;
use opcua_core::{UaError, UaResult};
use rand::Rng;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;

/// Connection state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed { attempts: u32 },
    Closed,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Error for a call made in this state, `None` when calls may proceed
    pub fn call_error(&self) -> Option<UaError> {
        match *self {
            ConnectionState::Connected => None,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => Some(UaError::Reconnecting),
            ConnectionState::Failed { attempts } => Some(UaError::ReconnectFailed { attempts }),
            ConnectionState::Closed => Some(UaError::InvalidState("client disconnected".to_string())),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => f.write_str("Connecting"),
            ConnectionState::Connected => f.write_str("Connected"),
            ConnectionState::Reconnecting { attempt } => write!(f, "Reconnecting (attempt {})", attempt),
            ConnectionState::Failed { attempts } => write!(f, "Failed after {} attempts", attempts),
            ConnectionState::Closed => f.write_str("Closed"),
        }
    }
}

/// Delay schedule between attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config }
    }

    /// Whether attempt number `attempt` (from 1) is within budget
    pub fn allows(&self, attempt: u32) -> bool {
        self.config.max_attempts.is_none_or(|max| attempt <= max)
    }

    /// Wait before attempt `attempt`; the first runs immediately
    pub fn delay(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exponent = (attempt - 2).min(63) as i32;
        let base = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        let capped = base.min(self.config.max_delay.as_secs_f64());
        let jitter = self.config.jitter;
        let factor = if jitter > 0.0 {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((capped * factor).max(0.0))
    }
}

/// One reconnection attempt
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReconnectTarget: Send + Sync {
    async fn attempt(&self, attempt: u32) -> UaResult<()>;
}

/// Drives attempts against a [`ReconnectTarget`] until one succeeds or the
/// budget is spent
#[derive(Debug)]
pub struct ReconnectController {
    backoff: Backoff,
    state: watch::Sender<ConnectionState>,
}

impl ReconnectController {
    pub fn new(config: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            backoff: Backoff::new(config),
            state,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                log::debug!("Connection state {} -> {}", current, state);
                *current = state;
                true
            }
        });
    }

    /// Run attempts until one succeeds
    ///
    /// # Errors
    ///
    /// `UaError::ReconnectFailed` once the attempt budget is spent. A
    /// configuration error from an attempt ends reconnection at once.
    pub async fn reconnect(&self, target: &dyn ReconnectTarget) -> UaResult<u32> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            if !self.backoff.allows(attempt) {
                let attempts = attempt - 1;
                log::error!("Reconnection failed after {} attempts", attempts);
                self.set_state(ConnectionState::Failed { attempts });
                return Err(UaError::ReconnectFailed { attempts });
            }
            self.set_state(ConnectionState::Reconnecting { attempt });
            let delay = self.backoff.delay(attempt);
            if !delay.is_zero() {
                log::debug!("Waiting {:?} before reconnection attempt {}", delay, attempt);
                tokio::time::sleep(delay).await;
            }

            log::warn!("Reconnection attempt {}", attempt);
            match target.attempt(attempt).await {
                Ok(()) => {
                    log::info!("Reconnected after {} attempt(s)", attempt);
                    self.set_state(ConnectionState::Connected);
                    return Ok(attempt);
                }
                Err(e @ (UaError::Config(_) | UaError::InvalidArgument(_))) => {
                    log::error!("Reconnection abandoned: {}", e);
                    self.set_state(ConnectionState::Failed { attempts: attempt });
                    return Err(e);
                }
                Err(e) => log::warn!("Reconnection attempt {} failed: {}", attempt, e),
            }
        }
    }
}
