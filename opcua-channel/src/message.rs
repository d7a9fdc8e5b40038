//! UA-TCP message header

use opcua_core::{BinaryDecoder, BinaryEncoder, UaError, UaResult};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Length of the message header (type, chunk type, size)
pub const MESSAGE_HEADER_LEN: usize = 8;

/// Message types of the UA-TCP protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Hello,
    Acknowledge,
    Error,
    OpenSecureChannel,
    CloseSecureChannel,
    Message,
}

impl MessageType {
    pub const fn as_bytes(&self) -> &'static [u8; 3] {
        match self {
            MessageType::Hello => b"HEL",
            MessageType::Acknowledge => b"ACK",
            MessageType::Error => b"ERR",
            MessageType::OpenSecureChannel => b"OPN",
            MessageType::CloseSecureChannel => b"CLO",
            MessageType::Message => b"MSG",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> UaResult<Self> {
        match bytes {
            b"HEL" => Ok(MessageType::Hello),
            b"ACK" => Ok(MessageType::Acknowledge),
            b"ERR" => Ok(MessageType::Error),
            b"OPN" => Ok(MessageType::OpenSecureChannel),
            b"CLO" => Ok(MessageType::CloseSecureChannel),
            b"MSG" => Ok(MessageType::Message),
            other => Err(UaError::Transport(format!(
                "unknown message type {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Whether messages of this type carry a secure channel id and security headers
    pub const fn is_secured(&self) -> bool {
        matches!(
            self,
            MessageType::OpenSecureChannel | MessageType::CloseSecureChannel | MessageType::Message
        )
    }
}

/// Position of a chunk within its message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkType {
    /// Last chunk of the message
    Final,
    /// More chunks follow
    Intermediate,
    /// The sender abandoned the message
    Abort,
}

impl ChunkType {
    pub const fn as_byte(&self) -> u8 {
        match self {
            ChunkType::Final => b'F',
            ChunkType::Intermediate => b'C',
            ChunkType::Abort => b'A',
        }
    }

    pub fn from_byte(byte: u8) -> UaResult<Self> {
        match byte {
            b'F' => Ok(ChunkType::Final),
            b'C' => Ok(ChunkType::Intermediate),
            b'A' => Ok(ChunkType::Abort),
            other => Err(UaError::Transport(format!("unknown chunk type 0x{:02X}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: MessageType,
    pub chunk_type: ChunkType,
    /// Size of the whole chunk, header included
    pub message_size: u32,
}

impl MessageHeader {
    pub fn encode(&self, encoder: &mut BinaryEncoder) {
        encoder.write_bytes(self.message_type.as_bytes());
        encoder.write_u8(self.chunk_type.as_byte());
        encoder.write_u32(self.message_size);
    }

    pub fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let message_type = MessageType::from_bytes(decoder.read_bytes(3)?)?;
        let chunk_type = ChunkType::from_byte(decoder.read_u8()?)?;
        let message_size = decoder.read_u32()?;
        if (message_size as usize) < MESSAGE_HEADER_LEN {
            return Err(UaError::Transport(format!(
                "message size {} smaller than header",
                message_size
            )));
        }
        Ok(Self {
            message_type,
            chunk_type,
            message_size,
        })
    }
}

/// Read one complete chunk (header included) from the stream
///
/// # Errors
///
/// Returns `UaError::Connection` on I/O failure or end of stream and
/// `UaError::Transport` if the chunk is malformed or exceeds `max_size`.
pub async fn read_chunk<R>(reader: &mut R, max_size: usize) -> UaResult<(MessageHeader, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut raw = vec![0u8; MESSAGE_HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    let header = MessageHeader::decode(&mut BinaryDecoder::new(&raw))?;
    let size = header.message_size as usize;
    if max_size != 0 && size > max_size {
        return Err(UaError::Transport(format!(
            "chunk of {} bytes exceeds receive buffer of {}",
            size, max_size
        )));
    }
    raw.resize(size, 0);
    reader.read_exact(&mut raw[MESSAGE_HEADER_LEN..]).await?;
    Ok((header, raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_wire_form() {
        let header = MessageHeader {
            message_type: MessageType::Message,
            chunk_type: ChunkType::Final,
            message_size: 24,
        };
        let mut encoder = BinaryEncoder::new();
        header.encode(&mut encoder);
        assert_eq!(encoder.as_slice(), b"MSGF\x18\x00\x00\x00");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let mut decoder = BinaryDecoder::new(b"XYZF\x08\x00\x00\x00");
        assert!(MessageHeader::decode(&mut decoder).is_err());
    }

    #[tokio::test]
    async fn test_read_chunk() {
        let bytes = b"ACKF\x0A\x00\x00\x00\x01\x02".to_vec();
        let mut reader = &bytes[..];
        let (header, raw) = read_chunk(&mut reader, 0).await.unwrap();
        assert_eq!(header.message_type, MessageType::Acknowledge);
        assert_eq!(raw.len(), 10);
    }

    #[tokio::test]
    async fn test_oversized_chunk_rejected() {
        let bytes = b"MSGF\x00\x10\x00\x00".to_vec();
        let mut reader = &bytes[..];
        assert!(matches!(
            read_chunk(&mut reader, 1024).await,
            Err(UaError::Transport(_))
        ));
    }
}
