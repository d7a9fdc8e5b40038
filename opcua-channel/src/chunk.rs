//! Secure conversation chunks (OPN, MSG, CLO)
//!
//! Layout of a chunk on the wire:
//!
//! ```text
//! +----------------+------------+-----------------+-----------------+------+---------+-----------+
//! | message header | channel id | security header | sequence header | body | padding | signature |
//! +----------------+------------+-----------------+-----------------+------+---------+-----------+
//!  <-------------- plain -------------------------> <------------ encrypted (SignAndEncrypt) ----->
//!  <------------------------------------ signed ------------------------------------->
//! ```
//!
//! The signature is computed over the header whose size field already holds
//! the final chunk size.

use crate::hello::ErrorMessage;
use crate::message::{ChunkType, MessageHeader, MessageType};
use crate::sequence::SendSequence;
use opcua_core::{
    binary_struct, BinaryDecoder, BinaryEncodable, BinaryEncoder, ByteString, StatusCode, UaError,
    UaResult,
};
use opcua_security::{AsymmetricSecurity, SecurityPolicy, SymmetricSecurity};

/// Encoded size of a [`SequenceHeader`]
pub const SEQUENCE_HEADER_LEN: usize = 8;

binary_struct! {
    /// Security header of OpenSecureChannel chunks
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct AsymmetricSecurityHeader {
        pub security_policy_uri: String,
        pub sender_certificate: ByteString,
        pub receiver_certificate_thumbprint: ByteString,
    }
}

impl AsymmetricSecurityHeader {
    /// Header for an unsecured channel
    pub fn none() -> Self {
        Self {
            security_policy_uri: SecurityPolicy::None.uri().to_string(),
            sender_certificate: ByteString::null(),
            receiver_certificate_thumbprint: ByteString::null(),
        }
    }

    pub fn for_security(security: &dyn AsymmetricSecurity) -> Self {
        Self {
            security_policy_uri: security.policy().uri().to_string(),
            sender_certificate: ByteString::from(security.local_certificate()),
            receiver_certificate_thumbprint: ByteString::from(
                security.remote_certificate_thumbprint(),
            ),
        }
    }
}

binary_struct! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SequenceHeader {
        pub sequence_number: u32,
        pub request_id: u32,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityHeader {
    Asymmetric(AsymmetricSecurityHeader),
    Symmetric { token_id: u32 },
}

impl SecurityHeader {
    pub fn encode(&self, encoder: &mut BinaryEncoder) {
        match self {
            SecurityHeader::Asymmetric(header) => header.encode(encoder),
            SecurityHeader::Symmetric { token_id } => encoder.write_u32(*token_id),
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            SecurityHeader::Asymmetric(header) => header.to_bytes().len(),
            SecurityHeader::Symmetric { .. } => 4,
        }
    }

    pub fn token_id(&self) -> Option<u32> {
        match self {
            SecurityHeader::Symmetric { token_id } => Some(*token_id),
            SecurityHeader::Asymmetric(_) => None,
        }
    }
}

/// Protection applied to, or removed from, one chunk
#[derive(Debug, Clone, Copy)]
pub enum Protection<'a> {
    None,
    Symmetric(&'a SymmetricSecurity),
    Asymmetric(&'a dyn AsymmetricSecurity),
}

/// The unprotected leading part of a received chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPrefix {
    pub header: MessageHeader,
    pub secure_channel_id: u32,
    pub security_header: SecurityHeader,
    /// Offset of the sequence header
    pub header_len: usize,
}

impl ChunkPrefix {
    /// Parse the plain prefix of a secured chunk
    ///
    /// # Errors
    ///
    /// Returns `UaError::Transport` for handshake messages or a size field
    /// that disagrees with the chunk length, and `UaError::Decoding` for a
    /// truncated prefix.
    pub fn parse(raw: &[u8]) -> UaResult<Self> {
        let mut decoder = BinaryDecoder::new(raw);
        let header = MessageHeader::decode(&mut decoder)?;
        if !header.message_type.is_secured() {
            return Err(UaError::Transport(format!(
                "{:?} is not a secure conversation message",
                header.message_type
            )));
        }
        if header.message_size as usize != raw.len() {
            return Err(UaError::Transport(format!(
                "chunk size field {} does not match length {}",
                header.message_size,
                raw.len()
            )));
        }
        let secure_channel_id = decoder.read_u32()?;
        let security_header = if header.message_type == MessageType::OpenSecureChannel {
            SecurityHeader::Asymmetric(decoder.decode()?)
        } else {
            SecurityHeader::Symmetric {
                token_id: decoder.read_u32()?,
            }
        };
        Ok(Self {
            header,
            secure_channel_id,
            security_header,
            header_len: decoder.position(),
        })
    }
}

/// A received chunk with its protection removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    pub header: MessageHeader,
    pub secure_channel_id: u32,
    pub security_header: SecurityHeader,
    pub sequence_header: SequenceHeader,
    pub body: Vec<u8>,
}

impl MessageChunk {
    pub fn request_id(&self) -> u32 {
        self.sequence_header.request_id
    }

    /// Error carried by an abort chunk
    pub fn abort_reason(&self) -> UaResult<ErrorMessage> {
        ErrorMessage::from_bytes(&self.body)
    }
}

/// Verify, decrypt and split a received chunk
///
/// # Errors
///
/// Returns `UaError::Security` if the signature, padding or encryption is
/// invalid, and `UaError::Decoding` if the sequence header is truncated.
pub fn open_chunk(
    mut raw: Vec<u8>,
    prefix: ChunkPrefix,
    protection: Protection<'_>,
) -> UaResult<MessageChunk> {
    let header_len = prefix.header_len;
    let plain = match protection {
        Protection::None => raw.split_off(header_len),
        Protection::Symmetric(security) => {
            if security.is_encrypting() {
                security.decrypt(&mut raw[header_len..])?;
            }
            let signature_len = security.signature_length();
            if raw.len() < header_len + SEQUENCE_HEADER_LEN + signature_len {
                return Err(UaError::Security("chunk too short for its signature".to_string()));
            }
            let signed_len = raw.len() - signature_len;
            security.verify(&raw[..signed_len], &raw[signed_len..])?;
            let plain_len = security.strip_padding(&raw[header_len..signed_len])?;
            raw.truncate(header_len + plain_len);
            raw.split_off(header_len)
        }
        Protection::Asymmetric(security) => {
            let mut unsealed = security.unseal(raw, header_len)?;
            if unsealed.len() < header_len {
                return Err(UaError::Security("unsealed chunk lost its header".to_string()));
            }
            unsealed.split_off(header_len)
        }
    };
    let mut decoder = BinaryDecoder::new(&plain);
    let sequence_header = SequenceHeader::decode(&mut decoder)?;
    let body = decoder.rest().to_vec();
    Ok(MessageChunk {
        header: prefix.header,
        secure_channel_id: prefix.secure_channel_id,
        security_header: prefix.security_header,
        sequence_header,
        body,
    })
}

/// Splits a message body into protected chunks
#[derive(Debug, Clone)]
pub struct ChunkWriter<'a> {
    pub message_type: MessageType,
    pub secure_channel_id: u32,
    pub security_header: SecurityHeader,
    pub protection: Protection<'a>,
    /// Largest chunk the peer accepts
    pub max_chunk_size: usize,
    /// 0 = unlimited
    pub max_chunk_count: usize,
    /// 0 = unlimited
    pub max_message_size: usize,
}

impl ChunkWriter<'_> {
    /// Largest body slice that fits into one chunk
    pub fn max_body_size(&self) -> usize {
        let prefix = crate::message::MESSAGE_HEADER_LEN + 4 + self.security_header.encoded_len();
        let available = self.max_chunk_size.saturating_sub(prefix);
        match self.protection {
            Protection::None | Protection::Asymmetric(_) => {
                available.saturating_sub(SEQUENCE_HEADER_LEN)
            }
            Protection::Symmetric(security) if !security.is_encrypting() => available
                .saturating_sub(SEQUENCE_HEADER_LEN + security.signature_length()),
            Protection::Symmetric(security) => {
                let block = security.block_size();
                (available / block * block)
                    .saturating_sub(security.signature_length() + 1 + SEQUENCE_HEADER_LEN)
            }
        }
    }

    /// Encode `body` as one or more chunks, numbering them from `sequence`
    ///
    /// # Errors
    ///
    /// Returns `UaError::Service(BadRequestTooLarge)` if the body exceeds
    /// the peer's message size or chunk count. `sequence` is only advanced
    /// for chunks actually produced.
    pub fn write(
        &self,
        request_id: u32,
        body: &[u8],
        sequence: &mut SendSequence,
    ) -> UaResult<Vec<Vec<u8>>> {
        let max_body = self.max_body_size();
        if max_body == 0 {
            return Err(UaError::Encoding(format!(
                "chunk size {} leaves no room for a body",
                self.max_chunk_size
            )));
        }
        if self.max_message_size != 0 && body.len() > self.max_message_size {
            return Err(UaError::Service(StatusCode::BAD_REQUEST_TOO_LARGE));
        }
        let parts: Vec<&[u8]> = if body.is_empty() {
            vec![body]
        } else {
            body.chunks(max_body).collect()
        };
        if self.max_chunk_count != 0 && parts.len() > self.max_chunk_count {
            return Err(UaError::Service(StatusCode::BAD_REQUEST_TOO_LARGE));
        }

        let mut numbering = *sequence;
        let last = parts.len() - 1;
        let chunks = parts
            .iter()
            .enumerate()
            .map(|(index, part)| {
                let chunk_type = if index == last {
                    ChunkType::Final
                } else {
                    ChunkType::Intermediate
                };
                let sequence_header = SequenceHeader {
                    sequence_number: numbering.next_number(),
                    request_id,
                };
                self.write_chunk(chunk_type, sequence_header, part)
            })
            .collect::<UaResult<Vec<_>>>()?;
        *sequence = numbering;
        Ok(chunks)
    }

    /// Encode an abort chunk for `request_id`
    pub fn write_abort(
        &self,
        request_id: u32,
        error: StatusCode,
        reason: &str,
        sequence: &mut SendSequence,
    ) -> UaResult<Vec<u8>> {
        let body = ErrorMessage {
            error,
            reason: reason.to_string(),
        }
        .to_bytes();
        let sequence_header = SequenceHeader {
            sequence_number: sequence.next_number(),
            request_id,
        };
        self.write_chunk(ChunkType::Abort, sequence_header, &body)
    }

    fn write_chunk(
        &self,
        chunk_type: ChunkType,
        sequence_header: SequenceHeader,
        body: &[u8],
    ) -> UaResult<Vec<u8>> {
        let mut encoder = BinaryEncoder::with_capacity(self.max_chunk_size);
        MessageHeader {
            message_type: self.message_type,
            chunk_type,
            message_size: 0,
        }
        .encode(&mut encoder);
        encoder.write_u32(self.secure_channel_id);
        self.security_header.encode(&mut encoder);
        let header_len = encoder.len();
        sequence_header.encode(&mut encoder);
        encoder.write_bytes(body);

        match self.protection {
            Protection::None => {
                let size = encoder.len() as u32;
                encoder.patch_u32(4, size);
                Ok(encoder.into_vec())
            }
            Protection::Symmetric(security) => {
                let padding = security.padding(encoder.len() - header_len);
                encoder.write_bytes(&padding);
                let size = (encoder.len() + security.signature_length()) as u32;
                encoder.patch_u32(4, size);
                let signature = security.sign(encoder.as_slice())?;
                encoder.write_bytes(&signature);
                let mut chunk = encoder.into_vec();
                if security.is_encrypting() {
                    security.encrypt(&mut chunk[header_len..])?;
                }
                Ok(chunk)
            }
            Protection::Asymmetric(security) => security.seal(encoder.into_vec(), header_len),
        }
    }
}
