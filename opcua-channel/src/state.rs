//! Secure channel lifecycle
//!
//! # State Transitions
//!
//! ```text
//!   Closed ──open()──> Connecting ──OPN issued──> Open ──close()──> Closing ──> Closed
//!                          │                       │
//!                          │ handshake failed      │ I/O error, ERR message,
//!                          v                       │ renewal failure, security error
//!                       Closed                     v
//!                                                 Lost
//! ```
//!
//! `Lost` is terminal for the channel; the reconnection controller opens a
//! new one.

use opcua_core::{UaError, UaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelState {
    #[default]
    Closed,
    Connecting,
    Open,
    Closing,
    Lost,
}

impl ChannelState {
    /// Whether requests may be sent
    pub fn is_open(&self) -> bool {
        matches!(self, ChannelState::Open)
    }

    /// Whether the channel reached an end state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::Closed | ChannelState::Lost)
    }

    pub fn validate_transition(&self, to: ChannelState) -> UaResult<()> {
        use ChannelState::*;
        let valid = matches!(
            (self, to),
            (Closed, Connecting)
                | (Connecting, Open)
                | (Connecting, Closed)
                | (Connecting, Lost)
                | (Open, Closing)
                | (Open, Lost)
                | (Closing, Closed)
                | (Closing, Lost)
        );
        if valid {
            Ok(())
        } else {
            Err(UaError::InvalidState(format!(
                "invalid channel transition from {} to {}",
                self.as_str(),
                to.as_str()
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Closed => "Closed",
            ChannelState::Connecting => "Connecting",
            ChannelState::Open => "Open",
            ChannelState::Closing => "Closing",
            ChannelState::Lost => "Lost",
        }
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
