//! Hello / Acknowledge handshake and transport limit negotiation

use crate::message::{ChunkType, MessageHeader, MessageType};
use opcua_core::{binary_struct, BinaryEncodable, BinaryEncoder, StatusCode, UaError, UaResult};

/// UA-TCP protocol version spoken by this client
pub const PROTOCOL_VERSION: u32 = 0;

/// Smallest chunk size a peer may announce
pub const MIN_BUFFER_SIZE: u32 = 8192;

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct HelloMessage {
        pub protocol_version: u32,
        pub receive_buffer_size: u32,
        pub send_buffer_size: u32,
        pub max_message_size: u32,
        pub max_chunk_count: u32,
        pub endpoint_url: String,
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct AcknowledgeMessage {
        pub protocol_version: u32,
        pub receive_buffer_size: u32,
        pub send_buffer_size: u32,
        pub max_message_size: u32,
        pub max_chunk_count: u32,
    }
}

binary_struct! {
    /// Error reported by the server before closing the connection
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct ErrorMessage {
        pub error: StatusCode,
        pub reason: String,
    }
}

/// Frame a handshake message (HEL, ACK or ERR) as a single final chunk
pub fn frame_message<T: BinaryEncodable>(message_type: MessageType, body: &T) -> Vec<u8> {
    let mut encoder = BinaryEncoder::new();
    MessageHeader {
        message_type,
        chunk_type: ChunkType::Final,
        message_size: 0,
    }
    .encode(&mut encoder);
    body.encode(&mut encoder);
    let size = encoder.len() as u32;
    encoder.patch_u32(4, size);
    encoder.into_vec()
}

/// Limits the client announces in its Hello message
///
/// A value of zero for `max_message_size` or `max_chunk_count` means no limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportLimits {
    pub receive_buffer_size: u32,
    pub send_buffer_size: u32,
    pub max_message_size: u32,
    pub max_chunk_count: u32,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            receive_buffer_size: 65535,
            send_buffer_size: 65535,
            max_message_size: 16 * 1024 * 1024,
            max_chunk_count: 512,
        }
    }
}

/// Limits in force after the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedLimits {
    /// Largest chunk the client may send
    pub send_buffer_size: usize,
    /// Largest chunk the client accepts
    pub receive_buffer_size: usize,
    /// Largest message the server accepts (0 = unlimited)
    pub max_send_message_size: usize,
    /// Largest number of chunks the server accepts (0 = unlimited)
    pub max_send_chunk_count: usize,
    /// Largest message the client accepts (0 = unlimited)
    pub max_receive_message_size: usize,
    /// Largest number of chunks the client accepts (0 = unlimited)
    pub max_receive_chunk_count: usize,
}

impl TransportLimits {
    pub fn hello(&self, endpoint_url: &str) -> HelloMessage {
        HelloMessage {
            protocol_version: PROTOCOL_VERSION,
            receive_buffer_size: self.receive_buffer_size,
            send_buffer_size: self.send_buffer_size,
            max_message_size: self.max_message_size,
            max_chunk_count: self.max_chunk_count,
            endpoint_url: endpoint_url.to_string(),
        }
    }

    pub fn validate(&self) -> UaResult<()> {
        if self.receive_buffer_size < MIN_BUFFER_SIZE || self.send_buffer_size < MIN_BUFFER_SIZE {
            return Err(UaError::Config(format!(
                "buffer sizes must be at least {} bytes",
                MIN_BUFFER_SIZE
            )));
        }
        Ok(())
    }

    /// Combine our limits with the server's acknowledgement
    ///
    /// # Errors
    ///
    /// Returns `UaError::Transport` if the server announces a buffer smaller
    /// than the protocol minimum.
    pub fn negotiate(&self, ack: &AcknowledgeMessage) -> UaResult<NegotiatedLimits> {
        if ack.receive_buffer_size < MIN_BUFFER_SIZE || ack.send_buffer_size < MIN_BUFFER_SIZE {
            return Err(UaError::Transport(format!(
                "server buffer sizes {}/{} below minimum {}",
                ack.receive_buffer_size, ack.send_buffer_size, MIN_BUFFER_SIZE
            )));
        }
        if ack.protocol_version > PROTOCOL_VERSION {
            log::debug!(
                "Server protocol version {} newer than {}",
                ack.protocol_version,
                PROTOCOL_VERSION
            );
        }
        Ok(NegotiatedLimits {
            send_buffer_size: self.send_buffer_size.min(ack.receive_buffer_size) as usize,
            receive_buffer_size: self.receive_buffer_size.min(ack.send_buffer_size) as usize,
            max_send_message_size: ack.max_message_size as usize,
            max_send_chunk_count: ack.max_chunk_count as usize,
            max_receive_message_size: self.max_message_size as usize,
            max_receive_chunk_count: self.max_chunk_count as usize,
        })
    }
}
