//! OPC-UA status codes
//!
//! A status code is a 32-bit value whose two most significant bits carry the
//! severity (Good, Uncertain, Bad). Only the codes the client stack inspects
//! are named here; any other value is carried through unchanged.

use std::fmt;

/// OPC-UA status code
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StatusCode(u32);

macro_rules! status_codes {
    ($($name:ident = $value:literal, $text:literal;)*) => {
        impl StatusCode {
            $(
                #[allow(missing_docs)]
                pub const $name: StatusCode = StatusCode($value);
            )*

            /// Symbolic name of a well-known code
            pub fn name(&self) -> Option<&'static str> {
                // Info bits do not change the identity of the code
                match self.0 & 0xFFFF_0000 {
                    $($value => Some($text),)*
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    GOOD = 0x0000_0000, "Good";
    UNCERTAIN = 0x4000_0000, "Uncertain";
    BAD = 0x8000_0000, "Bad";
    BAD_UNEXPECTED_ERROR = 0x8001_0000, "BadUnexpectedError";
    BAD_INTERNAL_ERROR = 0x8002_0000, "BadInternalError";
    BAD_COMMUNICATION_ERROR = 0x8005_0000, "BadCommunicationError";
    BAD_ENCODING_ERROR = 0x8006_0000, "BadEncodingError";
    BAD_DECODING_ERROR = 0x8007_0000, "BadDecodingError";
    BAD_ENCODING_LIMITS_EXCEEDED = 0x8008_0000, "BadEncodingLimitsExceeded";
    BAD_UNKNOWN_RESPONSE = 0x8009_0000, "BadUnknownResponse";
    BAD_TIMEOUT = 0x800A_0000, "BadTimeout";
    BAD_SERVICE_UNSUPPORTED = 0x800B_0000, "BadServiceUnsupported";
    BAD_SHUTDOWN = 0x800C_0000, "BadShutdown";
    BAD_SERVER_NOT_CONNECTED = 0x800D_0000, "BadServerNotConnected";
    BAD_NOTHING_TO_DO = 0x800F_0000, "BadNothingToDo";
    BAD_TOO_MANY_OPERATIONS = 0x8010_0000, "BadTooManyOperations";
    BAD_CERTIFICATE_INVALID = 0x8012_0000, "BadCertificateInvalid";
    BAD_SECURITY_CHECKS_FAILED = 0x8013_0000, "BadSecurityChecksFailed";
    BAD_USER_ACCESS_DENIED = 0x801F_0000, "BadUserAccessDenied";
    BAD_IDENTITY_TOKEN_INVALID = 0x8020_0000, "BadIdentityTokenInvalid";
    BAD_IDENTITY_TOKEN_REJECTED = 0x8021_0000, "BadIdentityTokenRejected";
    BAD_SECURE_CHANNEL_ID_INVALID = 0x8022_0000, "BadSecureChannelIdInvalid";
    BAD_SESSION_ID_INVALID = 0x8025_0000, "BadSessionIdInvalid";
    BAD_SESSION_CLOSED = 0x8026_0000, "BadSessionClosed";
    BAD_SESSION_NOT_ACTIVATED = 0x8027_0000, "BadSessionNotActivated";
    BAD_SUBSCRIPTION_ID_INVALID = 0x8028_0000, "BadSubscriptionIdInvalid";
    BAD_REQUEST_HEADER_INVALID = 0x802A_0000, "BadRequestHeaderInvalid";
    BAD_REQUEST_CANCELLED_BY_CLIENT = 0x802C_0000, "BadRequestCancelledByClient";
    BAD_NO_COMMUNICATION = 0x8031_0000, "BadNoCommunication";
    BAD_WAITING_FOR_INITIAL_DATA = 0x8032_0000, "BadWaitingForInitialData";
    BAD_NODE_ID_INVALID = 0x8033_0000, "BadNodeIdInvalid";
    BAD_NODE_ID_UNKNOWN = 0x8034_0000, "BadNodeIdUnknown";
    BAD_ATTRIBUTE_ID_INVALID = 0x8035_0000, "BadAttributeIdInvalid";
    BAD_NOT_READABLE = 0x803A_0000, "BadNotReadable";
    BAD_NOT_WRITABLE = 0x803B_0000, "BadNotWritable";
    BAD_NOT_SUPPORTED = 0x803D_0000, "BadNotSupported";
    BAD_NOT_IMPLEMENTED = 0x8040_0000, "BadNotImplemented";
    BAD_MONITORED_ITEM_ID_INVALID = 0x8042_0000, "BadMonitoredItemIdInvalid";
    BAD_REQUEST_TYPE_INVALID = 0x8053_0000, "BadRequestTypeInvalid";
    BAD_TOO_MANY_SESSIONS = 0x8056_0000, "BadTooManySessions";
    BAD_BROWSE_NAME_INVALID = 0x8060_0000, "BadBrowseNameInvalid";
    BAD_NO_MATCH = 0x806F_0000, "BadNoMatch";
    BAD_WRITE_NOT_SUPPORTED = 0x8073_0000, "BadWriteNotSupported";
    BAD_TYPE_MISMATCH = 0x8074_0000, "BadTypeMismatch";
    BAD_TOO_MANY_PUBLISH_REQUESTS = 0x8078_0000, "BadTooManyPublishRequests";
    BAD_NO_SUBSCRIPTION = 0x8079_0000, "BadNoSubscription";
    BAD_SEQUENCE_NUMBER_UNKNOWN = 0x807A_0000, "BadSequenceNumberUnknown";
    BAD_MESSAGE_NOT_AVAILABLE = 0x807B_0000, "BadMessageNotAvailable";
    BAD_TCP_SECURE_CHANNEL_UNKNOWN = 0x807F_0000, "BadTcpSecureChannelUnknown";
    BAD_TCP_MESSAGE_TOO_LARGE = 0x8080_0000, "BadTcpMessageTooLarge";
    BAD_TCP_NOT_ENOUGH_RESOURCES = 0x8081_0000, "BadTcpNotEnoughResources";
    BAD_TCP_INTERNAL_ERROR = 0x8082_0000, "BadTcpInternalError";
    BAD_TCP_ENDPOINT_URL_INVALID = 0x8083_0000, "BadTcpEndpointUrlInvalid";
    BAD_REQUEST_INTERRUPTED = 0x8084_0000, "BadRequestInterrupted";
    BAD_REQUEST_TIMEOUT = 0x8085_0000, "BadRequestTimeout";
    BAD_SECURE_CHANNEL_CLOSED = 0x8086_0000, "BadSecureChannelClosed";
    BAD_SECURE_CHANNEL_TOKEN_UNKNOWN = 0x8087_0000, "BadSecureChannelTokenUnknown";
    BAD_SEQUENCE_NUMBER_INVALID = 0x8088_0000, "BadSequenceNumberInvalid";
    BAD_OUT_OF_SERVICE = 0x808D_0000, "BadOutOfService";
    BAD_CONNECTION_CLOSED = 0x80AE_0000, "BadConnectionClosed";
    BAD_INVALID_STATE = 0x80AF_0000, "BadInvalidState";
    BAD_REQUEST_TOO_LARGE = 0x80B8_0000, "BadRequestTooLarge";
    BAD_RESPONSE_TOO_LARGE = 0x80B9_0000, "BadResponseTooLarge";
    BAD_PROTOCOL_VERSION_UNSUPPORTED = 0x80BE_0000, "BadProtocolVersionUnsupported";
}

impl StatusCode {
    /// Create a status code from its raw value
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    /// Raw 32-bit value
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Severity is Good
    pub const fn is_good(&self) -> bool {
        self.0 & 0xC000_0000 == 0
    }

    /// Severity is Uncertain
    pub const fn is_uncertain(&self) -> bool {
        self.0 & 0xC000_0000 == 0x4000_0000
    }

    /// Severity is Bad
    pub const fn is_bad(&self) -> bool {
        self.0 & 0x8000_0000 != 0
    }

    /// Whether this code invalidates the session it was reported on
    pub fn is_session_error(&self) -> bool {
        matches!(
            self.without_info_bits(),
            StatusCode::BAD_SESSION_ID_INVALID
                | StatusCode::BAD_SESSION_CLOSED
                | StatusCode::BAD_SESSION_NOT_ACTIVATED
        )
    }

    /// Whether this code invalidates the secure channel it was reported on
    pub fn is_channel_error(&self) -> bool {
        matches!(
            self.without_info_bits(),
            StatusCode::BAD_SECURE_CHANNEL_ID_INVALID
                | StatusCode::BAD_SECURITY_CHECKS_FAILED
                | StatusCode::BAD_TCP_SECURE_CHANNEL_UNKNOWN
                | StatusCode::BAD_SECURE_CHANNEL_TOKEN_UNKNOWN
                | StatusCode::BAD_SECURE_CHANNEL_CLOSED
                | StatusCode::BAD_REQUEST_TYPE_INVALID
        )
    }

    /// Whether this code means the server does not offer the service
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self.without_info_bits(),
            StatusCode::BAD_SERVICE_UNSUPPORTED
                | StatusCode::BAD_NOT_IMPLEMENTED
                | StatusCode::BAD_NOT_SUPPORTED
                | StatusCode::BAD_OUT_OF_SERVICE
        )
    }

    fn without_info_bits(&self) -> StatusCode {
        StatusCode(self.0 & 0xFFFF_0000)
    }
}

impl From<u32> for StatusCode {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<StatusCode> for u32 {
    fn from(value: StatusCode) -> Self {
        value.0
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:08X})", name, self.0),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StatusCode({})", self)
    }
}
