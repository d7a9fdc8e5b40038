//! Variant: the tagged value container of attribute values

use crate::datatypes::data_value::DataValue;
use crate::datatypes::date_time::DateTime;
use crate::datatypes::diagnostic_info::DiagnosticInfo;
use crate::datatypes::extension_object::ExtensionObject;
use crate::datatypes::guid::Guid;
use crate::datatypes::node_id::{ExpandedNodeId, NodeId};
use crate::datatypes::strings::{ByteString, LocalizedText, QualifiedName};
use crate::encoding::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use crate::error::{UaError, UaResult};
use crate::status_code::StatusCode;

const ARRAY_FLAG: u8 = 0x80;
const DIMENSIONS_FLAG: u8 = 0x40;

/// Built-in type ids used in the Variant encoding mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VariantTypeId {
    Boolean = 1,
    SByte = 2,
    Byte = 3,
    Int16 = 4,
    UInt16 = 5,
    Int32 = 6,
    UInt32 = 7,
    Int64 = 8,
    UInt64 = 9,
    Float = 10,
    Double = 11,
    String = 12,
    DateTime = 13,
    Guid = 14,
    ByteString = 15,
    XmlElement = 16,
    NodeId = 17,
    ExpandedNodeId = 18,
    StatusCode = 19,
    QualifiedName = 20,
    LocalizedText = 21,
    ExtensionObject = 22,
    DataValue = 23,
    Variant = 24,
    DiagnosticInfo = 25,
}

impl VariantTypeId {
    pub fn from_u8(value: u8) -> Option<Self> {
        use VariantTypeId::*;
        Some(match value {
            1 => Boolean,
            2 => SByte,
            3 => Byte,
            4 => Int16,
            5 => UInt16,
            6 => Int32,
            7 => UInt32,
            8 => Int64,
            9 => UInt64,
            10 => Float,
            11 => Double,
            12 => String,
            13 => DateTime,
            14 => Guid,
            15 => ByteString,
            16 => XmlElement,
            17 => NodeId,
            18 => ExpandedNodeId,
            19 => StatusCode,
            20 => QualifiedName,
            21 => LocalizedText,
            22 => ExtensionObject,
            23 => DataValue,
            24 => Variant,
            25 => DiagnosticInfo,
            _ => return None,
        })
    }
}

/// Array value with a single element type
#[derive(Debug, Clone, PartialEq)]
pub struct VariantArray {
    pub element_type: VariantTypeId,
    pub values: Vec<Variant>,
    pub dimensions: Option<Vec<i32>>,
}

/// Any OPC-UA value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    #[default]
    Empty,
    Boolean(bool),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime),
    Guid(Guid),
    ByteString(ByteString),
    XmlElement(String),
    NodeId(Box<NodeId>),
    ExpandedNodeId(Box<ExpandedNodeId>),
    StatusCode(StatusCode),
    QualifiedName(Box<QualifiedName>),
    LocalizedText(Box<LocalizedText>),
    ExtensionObject(Box<ExtensionObject>),
    DataValue(Box<DataValue>),
    Variant(Box<Variant>),
    DiagnosticInfo(Box<DiagnosticInfo>),
    Array(Box<VariantArray>),
}

impl Variant {
    /// Build an array value
    ///
    /// # Errors
    ///
    /// Returns `UaError::InvalidArgument` if an element is not a scalar of
    /// `element_type`.
    pub fn array(element_type: VariantTypeId, values: Vec<Variant>) -> UaResult<Self> {
        if let Some(bad) = values.iter().find(|v| v.type_id() != Some(element_type)) {
            return Err(UaError::InvalidArgument(format!(
                "array of {:?} cannot hold {}",
                element_type,
                bad.type_name()
            )));
        }
        Ok(Variant::Array(Box::new(VariantArray {
            element_type,
            values,
            dimensions: None,
        })))
    }

    /// Type id of a scalar value; `None` for Empty and arrays
    pub fn type_id(&self) -> Option<VariantTypeId> {
        use VariantTypeId as T;
        Some(match self {
            Variant::Empty | Variant::Array(_) => return None,
            Variant::Boolean(_) => T::Boolean,
            Variant::SByte(_) => T::SByte,
            Variant::Byte(_) => T::Byte,
            Variant::Int16(_) => T::Int16,
            Variant::UInt16(_) => T::UInt16,
            Variant::Int32(_) => T::Int32,
            Variant::UInt32(_) => T::UInt32,
            Variant::Int64(_) => T::Int64,
            Variant::UInt64(_) => T::UInt64,
            Variant::Float(_) => T::Float,
            Variant::Double(_) => T::Double,
            Variant::String(_) => T::String,
            Variant::DateTime(_) => T::DateTime,
            Variant::Guid(_) => T::Guid,
            Variant::ByteString(_) => T::ByteString,
            Variant::XmlElement(_) => T::XmlElement,
            Variant::NodeId(_) => T::NodeId,
            Variant::ExpandedNodeId(_) => T::ExpandedNodeId,
            Variant::StatusCode(_) => T::StatusCode,
            Variant::QualifiedName(_) => T::QualifiedName,
            Variant::LocalizedText(_) => T::LocalizedText,
            Variant::ExtensionObject(_) => T::ExtensionObject,
            Variant::DataValue(_) => T::DataValue,
            Variant::Variant(_) => T::Variant,
            Variant::DiagnosticInfo(_) => T::DiagnosticInfo,
        })
    }

    /// Human-readable type name, used in type mismatch errors
    pub fn type_name(&self) -> String {
        match self {
            Variant::Empty => "Empty".to_string(),
            Variant::Array(array) => format!("Array<{:?}>", array.element_type),
            other => match other.type_id() {
                Some(id) => format!("{:?}", id),
                None => "Unknown".to_string(),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Variant::Empty)
    }

    fn encode_value(&self, encoder: &mut BinaryEncoder) {
        match self {
            Variant::Empty | Variant::Array(_) => {}
            Variant::Boolean(v) => v.encode(encoder),
            Variant::SByte(v) => v.encode(encoder),
            Variant::Byte(v) => v.encode(encoder),
            Variant::Int16(v) => v.encode(encoder),
            Variant::UInt16(v) => v.encode(encoder),
            Variant::Int32(v) => v.encode(encoder),
            Variant::UInt32(v) => v.encode(encoder),
            Variant::Int64(v) => v.encode(encoder),
            Variant::UInt64(v) => v.encode(encoder),
            Variant::Float(v) => v.encode(encoder),
            Variant::Double(v) => v.encode(encoder),
            Variant::String(v) | Variant::XmlElement(v) => v.encode(encoder),
            Variant::DateTime(v) => v.encode(encoder),
            Variant::Guid(v) => v.encode(encoder),
            Variant::ByteString(v) => v.encode(encoder),
            Variant::NodeId(v) => v.encode(encoder),
            Variant::ExpandedNodeId(v) => v.encode(encoder),
            Variant::StatusCode(v) => v.encode(encoder),
            Variant::QualifiedName(v) => v.encode(encoder),
            Variant::LocalizedText(v) => v.encode(encoder),
            Variant::ExtensionObject(v) => v.encode(encoder),
            Variant::DataValue(v) => v.encode(encoder),
            Variant::Variant(v) => v.encode(encoder),
            Variant::DiagnosticInfo(v) => v.encode(encoder),
        }
    }

    fn decode_value(decoder: &mut BinaryDecoder<'_>, type_id: VariantTypeId) -> UaResult<Self> {
        use VariantTypeId as T;
        Ok(match type_id {
            T::Boolean => Variant::Boolean(decoder.decode()?),
            T::SByte => Variant::SByte(decoder.decode()?),
            T::Byte => Variant::Byte(decoder.decode()?),
            T::Int16 => Variant::Int16(decoder.decode()?),
            T::UInt16 => Variant::UInt16(decoder.decode()?),
            T::Int32 => Variant::Int32(decoder.decode()?),
            T::UInt32 => Variant::UInt32(decoder.decode()?),
            T::Int64 => Variant::Int64(decoder.decode()?),
            T::UInt64 => Variant::UInt64(decoder.decode()?),
            T::Float => Variant::Float(decoder.decode()?),
            T::Double => Variant::Double(decoder.decode()?),
            T::String => Variant::String(decoder.decode()?),
            T::DateTime => Variant::DateTime(decoder.decode()?),
            T::Guid => Variant::Guid(decoder.decode()?),
            T::ByteString => Variant::ByteString(decoder.decode()?),
            T::XmlElement => Variant::XmlElement(decoder.decode()?),
            T::NodeId => Variant::NodeId(Box::new(decoder.decode()?)),
            T::ExpandedNodeId => Variant::ExpandedNodeId(Box::new(decoder.decode()?)),
            T::StatusCode => Variant::StatusCode(decoder.decode()?),
            T::QualifiedName => Variant::QualifiedName(Box::new(decoder.decode()?)),
            T::LocalizedText => Variant::LocalizedText(Box::new(decoder.decode()?)),
            T::ExtensionObject => Variant::ExtensionObject(Box::new(decoder.decode()?)),
            T::DataValue => {
                decoder.enter()?;
                let value = DataValue::decode(decoder);
                decoder.leave();
                Variant::DataValue(Box::new(value?))
            }
            T::Variant => {
                decoder.enter()?;
                let value = Variant::decode(decoder);
                decoder.leave();
                Variant::Variant(Box::new(value?))
            }
            T::DiagnosticInfo => Variant::DiagnosticInfo(Box::new(decoder.decode()?)),
        })
    }
}

impl BinaryEncodable for Variant {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        match self {
            Variant::Empty => encoder.write_u8(0),
            Variant::Array(array) => {
                let mut mask = array.element_type as u8 | ARRAY_FLAG;
                if array.dimensions.is_some() {
                    mask |= DIMENSIONS_FLAG;
                }
                encoder.write_u8(mask);
                encoder.write_i32(array.values.len() as i32);
                for value in &array.values {
                    value.encode_value(encoder);
                }
                if let Some(dimensions) = &array.dimensions {
                    encoder.write_array(dimensions);
                }
            }
            scalar => {
                if let Some(type_id) = scalar.type_id() {
                    encoder.write_u8(type_id as u8);
                    scalar.encode_value(encoder);
                }
            }
        }
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let mask = decoder.read_u8()?;
        let raw_type = mask & 0x3F;
        if raw_type == 0 {
            return Ok(Variant::Empty);
        }
        let type_id = VariantTypeId::from_u8(raw_type).ok_or_else(|| {
            UaError::Decoding(format!("invalid variant type id {}", raw_type))
        })?;
        if mask & ARRAY_FLAG == 0 {
            return Variant::decode_value(decoder, type_id);
        }
        let len = decoder.read_length()?.unwrap_or(0);
        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            values.push(Variant::decode_value(decoder, type_id)?);
        }
        let dimensions = if mask & DIMENSIONS_FLAG != 0 {
            Some(decoder.read_array::<i32>()?)
        } else {
            None
        };
        Ok(Variant::Array(Box::new(VariantArray {
            element_type: type_id,
            values,
            dimensions,
        })))
    }
}

macro_rules! variant_from {
    ($($ty:ty => $variant:ident;)*) => {
        $(
            impl From<$ty> for Variant {
                fn from(value: $ty) -> Self {
                    Variant::$variant(value)
                }
            }
        )*
    };
}

variant_from! {
    bool => Boolean;
    i8 => SByte;
    u8 => Byte;
    i16 => Int16;
    u16 => UInt16;
    i32 => Int32;
    u32 => UInt32;
    i64 => Int64;
    u64 => UInt64;
    f32 => Float;
    f64 => Double;
    String => String;
    DateTime => DateTime;
    Guid => Guid;
    ByteString => ByteString;
    StatusCode => StatusCode;
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<NodeId> for Variant {
    fn from(value: NodeId) -> Self {
        Variant::NodeId(Box::new(value))
    }
}

impl From<QualifiedName> for Variant {
    fn from(value: QualifiedName) -> Self {
        Variant::QualifiedName(Box::new(value))
    }
}

impl From<LocalizedText> for Variant {
    fn from(value: LocalizedText) -> Self {
        Variant::LocalizedText(Box::new(value))
    }
}

impl From<ExtensionObject> for Variant {
    fn from(value: ExtensionObject) -> Self {
        Variant::ExtensionObject(Box::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_wire_form() {
        assert_eq!(Variant::Int32(-1).to_bytes(), vec![6, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(Variant::Empty.to_bytes(), vec![0]);
    }

    #[test]
    fn test_array_wire_form() {
        let array = Variant::array(
            VariantTypeId::UInt16,
            vec![Variant::UInt16(1), Variant::UInt16(2)],
        )
        .unwrap();
        let bytes = array.to_bytes();
        assert_eq!(bytes, vec![0x85, 2, 0, 0, 0, 1, 0, 2, 0]);
        assert_eq!(Variant::from_bytes(&bytes).unwrap(), array);
    }

    #[test]
    fn test_mixed_array_rejected() {
        let result = Variant::array(
            VariantTypeId::Int32,
            vec![Variant::Int32(1), Variant::from("x")],
        );
        assert!(matches!(result, Err(UaError::InvalidArgument(_))));
    }

    #[test]
    fn test_unknown_type_id_rejected() {
        assert!(Variant::from_bytes(&[30]).is_err());
    }

    #[test]
    fn test_nested_variant_depth_bounded() {
        let bytes = vec![VariantTypeId::Variant as u8; 500];
        assert!(Variant::from_bytes(&bytes).is_err());
    }
}
