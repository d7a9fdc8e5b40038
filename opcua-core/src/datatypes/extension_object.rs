//! ExtensionObject: a structure wrapped with its encoding node id

use crate::datatypes::node_id::NodeId;
use crate::encoding::{BinaryDecoder, BinaryEncodable, BinaryEncoder, BinaryEncodingId};
use crate::error::{UaError, UaResult};

/// Encoded body of an extension object
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExtensionObjectBody {
    #[default]
    None,
    Binary(Vec<u8>),
    Xml(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExtensionObject {
    /// Node id of the body's encoding (e.g. `<Type>_Encoding_DefaultBinary`)
    pub type_id: NodeId,
    pub body: ExtensionObjectBody,
}

impl ExtensionObject {
    /// The empty extension object
    pub fn null() -> Self {
        Self::default()
    }

    pub fn is_null(&self) -> bool {
        self.type_id.is_null() && self.body == ExtensionObjectBody::None
    }

    /// Wrap a structure in its default binary encoding
    pub fn from_encodable<T: BinaryEncodable + BinaryEncodingId>(value: &T) -> Self {
        Self {
            type_id: NodeId::ns0(T::BINARY_ENCODING_ID),
            body: ExtensionObjectBody::Binary(value.to_bytes()),
        }
    }

    /// Whether the body holds a binary-encoded `T`
    pub fn is<T: BinaryEncodingId>(&self) -> bool {
        self.type_id.as_ns0_numeric() == Some(T::BINARY_ENCODING_ID)
    }

    /// Decode the body as `T`
    ///
    /// # Errors
    ///
    /// Returns `UaError::TypeMismatch` if the encoding id does not identify
    /// `T`, or `UaError::Decoding` if the body is not valid.
    pub fn decode_as<T: BinaryEncodable + BinaryEncodingId>(&self) -> UaResult<T> {
        if !self.is::<T>() {
            return Err(UaError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: self.type_id.to_string(),
            });
        }
        match &self.body {
            ExtensionObjectBody::Binary(bytes) => T::from_bytes(bytes),
            _ => Err(UaError::Decoding(format!(
                "extension object {} has no binary body",
                self.type_id
            ))),
        }
    }
}

impl BinaryEncodable for ExtensionObject {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        self.type_id.encode(encoder);
        match &self.body {
            ExtensionObjectBody::None => encoder.write_u8(0x00),
            ExtensionObjectBody::Binary(bytes) => {
                encoder.write_u8(0x01);
                encoder.write_byte_string(Some(bytes));
            }
            ExtensionObjectBody::Xml(bytes) => {
                encoder.write_u8(0x02);
                encoder.write_byte_string(Some(bytes));
            }
        }
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let type_id = NodeId::decode(decoder)?;
        let body = match decoder.read_u8()? {
            0x00 => ExtensionObjectBody::None,
            0x01 => ExtensionObjectBody::Binary(decoder.read_byte_string()?.unwrap_or_default()),
            0x02 => ExtensionObjectBody::Xml(decoder.read_byte_string()?.unwrap_or_default()),
            other => {
                return Err(UaError::Decoding(format!(
                    "invalid extension object encoding 0x{:02X}",
                    other
                )));
            }
        };
        Ok(Self { type_id, body })
    }
}
