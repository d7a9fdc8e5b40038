//! Conversions between variants and typed property values

use super::descriptor::ValueType;
use opcua_core::{
    BinaryEncodable, BinaryEncodingId, DateTime, ExtensionObject, LocalizedText, NodeId, UaError,
    UaResult, Variant, binary_enum, binary_struct,
};
use std::marker::PhantomData;

/// Typed view of a variant
pub trait ValueCodec: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    /// Type this codec reads, checked against the property descriptor
    fn value_type() -> ValueType;

    /// # Errors
    ///
    /// `UaError::TypeMismatch` when the variant holds another type
    fn decode(variant: &Variant) -> UaResult<Self::Value>;

    fn encode(value: &Self::Value) -> Variant;
}

fn mismatch<T>(expected: &'static str, variant: &Variant) -> UaResult<T> {
    Err(UaError::TypeMismatch {
        expected,
        actual: variant.type_name(),
    })
}

macro_rules! scalar_codec {
    ($($codec:ident => $ty:ty, $variant:ident, $value_type:ident;)*) => {
        $(
            #[derive(Debug, Clone, Copy, Default)]
            pub struct $codec;

            impl ValueCodec for $codec {
                type Value = $ty;

                fn value_type() -> ValueType {
                    ValueType::$value_type
                }

                fn decode(variant: &Variant) -> UaResult<$ty> {
                    match variant {
                        Variant::$variant(v) => Ok(v.clone()),
                        other => mismatch(stringify!($variant), other),
                    }
                }

                fn encode(value: &$ty) -> Variant {
                    Variant::$variant(value.clone())
                }
            }
        )*
    };
}

scalar_codec! {
    BooleanCodec => bool, Boolean, Boolean;
    Int32Codec => i32, Int32, Int32;
    UInt32Codec => u32, UInt32, UInt32;
    DoubleCodec => f64, Double, Double;
    StringCodec => String, String, String;
    DateTimeCodec => DateTime, DateTime, DateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalizedTextCodec;

impl ValueCodec for LocalizedTextCodec {
    type Value = LocalizedText;

    fn value_type() -> ValueType {
        ValueType::LocalizedText
    }

    fn decode(variant: &Variant) -> UaResult<LocalizedText> {
        match variant {
            Variant::LocalizedText(v) => Ok(v.as_ref().clone()),
            other => mismatch("LocalizedText", other),
        }
    }

    fn encode(value: &LocalizedText) -> Variant {
        Variant::LocalizedText(Box::new(value.clone()))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeIdCodec;

impl ValueCodec for NodeIdCodec {
    type Value = NodeId;

    fn value_type() -> ValueType {
        ValueType::NodeId
    }

    fn decode(variant: &Variant) -> UaResult<NodeId> {
        match variant {
            Variant::NodeId(v) => Ok(v.as_ref().clone()),
            other => mismatch("NodeId", other),
        }
    }

    fn encode(value: &NodeId) -> Variant {
        Variant::NodeId(Box::new(value.clone()))
    }
}

binary_enum! {
    /// Operating state of a server
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub enum ServerState {
        Running = 0,
        Failed = 1,
        NoConfiguration = 2,
        Suspended = 3,
        Shutdown = 4,
        Test = 5,
        CommunicationFault = 6,
        #[default]
        Unknown = 7,
    }
}

/// ServerState travels as Int32
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStateCodec;

impl ValueCodec for ServerStateCodec {
    type Value = ServerState;

    fn value_type() -> ValueType {
        ValueType::ServerState
    }

    fn decode(variant: &Variant) -> UaResult<ServerState> {
        match variant {
            Variant::Int32(v) => ServerState::from_i32(*v)
                .ok_or_else(|| UaError::Decoding(format!("invalid ServerState {}", v))),
            other => mismatch("Int32", other),
        }
    }

    fn encode(value: &ServerState) -> Variant {
        Variant::Int32(*value as i32)
    }
}

/// A structure carried in an extension object
pub trait StructuredValue: BinaryEncodable + BinaryEncodingId + Clone + Send + Sync + 'static {
    /// NodeId of the DataType
    const DATA_TYPE_ID: u32;
}

/// Codec for structures
#[derive(Debug, Clone, Copy, Default)]
pub struct StructureCodec<T>(PhantomData<fn() -> T>);

impl<T: StructuredValue> ValueCodec for StructureCodec<T> {
    type Value = T;

    fn value_type() -> ValueType {
        ValueType::Structure(T::DATA_TYPE_ID)
    }

    fn decode(variant: &Variant) -> UaResult<T> {
        match variant {
            Variant::ExtensionObject(object) => object.decode_as::<T>(),
            other => mismatch("ExtensionObject", other),
        }
    }

    fn encode(value: &T) -> Variant {
        Variant::ExtensionObject(Box::new(ExtensionObject::from_encodable(value)))
    }
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Eq, Default)]
    pub struct RationalNumber {
        pub numerator: i32,
        pub denominator: u32,
    }
}

impl BinaryEncodingId for RationalNumber {
    const BINARY_ENCODING_ID: u32 = 18815;
}

impl StructuredValue for RationalNumber {
    const DATA_TYPE_ID: u32 = opcua_core::ids::data_types::RATIONAL_NUMBER;
}

binary_struct! {
    #[derive(Debug, Clone, PartialEq, Default)]
    pub struct BuildInfo {
        pub product_uri: String,
        pub manufacturer_name: String,
        pub product_name: String,
        pub software_version: String,
        pub build_number: String,
        pub build_date: DateTime,
    }
}

impl BinaryEncodingId for BuildInfo {
    const BINARY_ENCODING_ID: u32 = 340;
}

impl StructuredValue for BuildInfo {
    const DATA_TYPE_ID: u32 = 338;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_mismatch_names_both_types() {
        let err = Int32Codec::decode(&Variant::from("seven")).unwrap_err();
        match err {
            UaError::TypeMismatch { expected, actual } => {
                assert_eq!(expected, "Int32");
                assert_eq!(actual, Variant::from("seven").type_name());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_structure_decodes_from_extension_object() {
        let value = RationalNumber {
            numerator: -3,
            denominator: 4,
        };
        let variant = StructureCodec::<RationalNumber>::encode(&value);
        assert!(matches!(variant, Variant::ExtensionObject(_)));
        assert_eq!(StructureCodec::<RationalNumber>::decode(&variant).unwrap(), value);
        assert!(matches!(
            StructureCodec::<BuildInfo>::decode(&variant),
            Err(UaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_server_state_from_int32() {
        assert_eq!(ServerStateCodec::decode(&Variant::Int32(0)).unwrap(), ServerState::Running);
        assert!(matches!(
            ServerStateCodec::decode(&Variant::Int32(42)),
            Err(UaError::Decoding(_))
        ));
        assert_eq!(ServerStateCodec::encode(&ServerState::Shutdown), Variant::Int32(4));
    }
}
