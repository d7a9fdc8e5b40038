use crate::status_code::StatusCode;
use thiserror::Error;

/// Main error type for OPC-UA client operations
#[derive(Error, Debug)]
pub enum UaError {
    #[error("Connection error: {0}")]
    Connection(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Secure channel lost: {0}")]
    ChannelLost(String),

    #[error("Security error: {0}")]
    Security(String),

    /// The request may or may not have been processed by the server
    #[error("Request timed out")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Decoding error: {0}")]
    Decoding(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    #[error("Service fault: {0}")]
    Service(StatusCode),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Session not activated")]
    NotActivated,

    #[error("Session transfer rejected: {0}")]
    TransferRejected(StatusCode),

    #[error("Session lost: {0}")]
    SessionLost(String),

    #[error("Client is reconnecting")]
    Reconnecting,

    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectFailed { attempts: u32 },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Coarse error classes, deciding how far a failure propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fatal to the secure channel
    Transport,
    /// Outcome unknown, recoverable by retry
    Timeout,
    /// Malformed or unexpected response, fatal to the request
    Protocol,
    /// Server-reported status, recoverable per operation
    Service,
    /// Activation/transfer failure, drives reconnection
    Session,
}

impl UaError {
    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            UaError::Connection(_)
            | UaError::Transport(_)
            | UaError::ChannelLost(_)
            | UaError::Security(_) => ErrorClass::Transport,
            UaError::Timeout => ErrorClass::Timeout,
            UaError::Protocol(_)
            | UaError::Decoding(_)
            | UaError::Encoding(_)
            | UaError::TypeMismatch { .. } => ErrorClass::Protocol,
            UaError::Service(status) if status.is_session_error() => ErrorClass::Session,
            UaError::Service(status) if status.is_channel_error() => ErrorClass::Transport,
            UaError::Service(_)
            | UaError::Cancelled
            | UaError::InvalidArgument(_)
            | UaError::InvalidState(_)
            | UaError::Config(_) => ErrorClass::Service,
            UaError::NotActivated
            | UaError::TransferRejected(_)
            | UaError::SessionLost(_)
            | UaError::Reconnecting
            | UaError::ReconnectFailed { .. } => ErrorClass::Session,
        }
    }

    /// Whether the failure invalidates the channel it occurred on
    pub fn is_fatal_to_channel(&self) -> bool {
        self.class() == ErrorClass::Transport
    }

    /// Whether the failure invalidates the session it occurred on
    pub fn is_fatal_to_session(&self) -> bool {
        matches!(self.class(), ErrorClass::Transport | ErrorClass::Session)
    }

    /// Status code carried by, or best describing, this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            UaError::Service(status) | UaError::TransferRejected(status) => *status,
            UaError::Timeout => StatusCode::BAD_TIMEOUT,
            UaError::Connection(_) | UaError::Transport(_) => StatusCode::BAD_COMMUNICATION_ERROR,
            UaError::ChannelLost(_) => StatusCode::BAD_SECURE_CHANNEL_CLOSED,
            UaError::Security(_) => StatusCode::BAD_SECURITY_CHECKS_FAILED,
            UaError::Decoding(_) => StatusCode::BAD_DECODING_ERROR,
            UaError::Encoding(_) => StatusCode::BAD_ENCODING_ERROR,
            UaError::Protocol(_) => StatusCode::BAD_UNKNOWN_RESPONSE,
            UaError::TypeMismatch { .. } => StatusCode::BAD_TYPE_MISMATCH,
            UaError::Cancelled => StatusCode::BAD_REQUEST_CANCELLED_BY_CLIENT,
            UaError::InvalidArgument(_) | UaError::Config(_) => StatusCode::BAD_INVALID_STATE,
            UaError::NotActivated => StatusCode::BAD_SESSION_NOT_ACTIVATED,
            UaError::SessionLost(_) => StatusCode::BAD_SESSION_CLOSED,
            UaError::Reconnecting => StatusCode::BAD_SERVER_NOT_CONNECTED,
            UaError::ReconnectFailed { .. } => StatusCode::BAD_NO_COMMUNICATION,
            UaError::InvalidState(_) => StatusCode::BAD_INVALID_STATE,
        }
    }
}

/// Result type alias for OPC-UA client operations
pub type UaResult<T> = Result<T, UaError>;
