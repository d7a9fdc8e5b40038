//! OPC-UA binary encoding
//!
//! Every type exchanged on the wire implements [`BinaryEncodable`]. Service
//! structures are declared with [`binary_struct!`], which encodes fields in
//! declaration order, and enumerations with [`binary_enum!`] (encoded as
//! Int32).

pub mod decoder;
pub mod encoder;

pub use decoder::{BinaryDecoder, MAX_DECODING_DEPTH};
pub use encoder::BinaryEncoder;

use crate::error::UaResult;
use crate::status_code::StatusCode;

/// A value with an OPC-UA binary representation
pub trait BinaryEncodable: Sized {
    /// Append the binary form of `self`
    fn encode(&self, encoder: &mut BinaryEncoder);

    /// Read a value from the decoder
    ///
    /// # Errors
    ///
    /// Returns `UaError::Decoding` on truncated or malformed input.
    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self>;

    /// Encode into a fresh byte vector
    fn to_bytes(&self) -> Vec<u8> {
        let mut encoder = BinaryEncoder::new();
        self.encode(&mut encoder);
        encoder.into_vec()
    }

    /// Decode from a complete buffer
    fn from_bytes(bytes: &[u8]) -> UaResult<Self> {
        let mut decoder = BinaryDecoder::new(bytes);
        Self::decode(&mut decoder)
    }
}

/// Numeric id (namespace 0) of the DefaultBinary encoding node of a structure
pub trait BinaryEncodingId {
    const BINARY_ENCODING_ID: u32;
}

macro_rules! primitive_encodable {
    ($($ty:ty => $write:ident, $read:ident;)*) => {
        $(
            impl BinaryEncodable for $ty {
                fn encode(&self, encoder: &mut BinaryEncoder) {
                    encoder.$write(*self);
                }

                fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
                    decoder.$read()
                }
            }
        )*
    };
}

primitive_encodable! {
    bool => write_bool, read_bool;
    u8 => write_u8, read_u8;
    i8 => write_i8, read_i8;
    u16 => write_u16, read_u16;
    i16 => write_i16, read_i16;
    u32 => write_u32, read_u32;
    i32 => write_i32, read_i32;
    u64 => write_u64, read_u64;
    i64 => write_i64, read_i64;
    f32 => write_f32, read_f32;
    f64 => write_f64, read_f64;
}

/// Strings are never null on the Rust side; the null string decodes as empty
impl BinaryEncodable for String {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        encoder.write_string(Some(self));
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        Ok(decoder.read_string()?.unwrap_or_default())
    }
}

impl<T: BinaryEncodable> BinaryEncodable for Vec<T> {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        encoder.write_array(self);
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        decoder.read_array()
    }
}

impl BinaryEncodable for StatusCode {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        encoder.write_u32(self.bits());
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        Ok(StatusCode::new(decoder.read_u32()?))
    }
}

/// Declare a structure whose binary encoding is its fields in order
#[macro_export]
macro_rules! binary_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::encoding::BinaryEncodable for $name {
            #[allow(unused_variables)]
            fn encode(&self, encoder: &mut $crate::encoding::BinaryEncoder) {
                $( $crate::encoding::BinaryEncodable::encode(&self.$field, encoder); )*
            }

            #[allow(unused_variables)]
            fn decode(
                decoder: &mut $crate::encoding::BinaryDecoder<'_>,
            ) -> $crate::error::UaResult<Self> {
                Ok(Self {
                    $( $field: $crate::encoding::BinaryEncodable::decode(decoder)?, )*
                })
            }
        }
    };
}

/// Declare an enumeration encoded as Int32
#[macro_export]
macro_rules! binary_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $value:literal
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant = $value,
            )*
        }

        impl $name {
            /// Map a wire value to a variant
            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    $( $value => Some(Self::$variant), )*
                    _ => None,
                }
            }
        }

        impl $crate::encoding::BinaryEncodable for $name {
            fn encode(&self, encoder: &mut $crate::encoding::BinaryEncoder) {
                encoder.write_i32(*self as i32);
            }

            fn decode(
                decoder: &mut $crate::encoding::BinaryDecoder<'_>,
            ) -> $crate::error::UaResult<Self> {
                let value = decoder.read_i32()?;
                Self::from_i32(value).ok_or_else(|| {
                    $crate::error::UaError::Decoding(format!(
                        "invalid {} value {}",
                        stringify!($name),
                        value
                    ))
                })
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    binary_struct! {
        #[derive(Debug, Clone, PartialEq, Default)]
        struct Sample {
            id: u32,
            name: String,
            values: Vec<i16>,
        }
    }

    binary_enum! {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        enum Mode {
            Off = 0,
            On = 2,
        }
    }

    #[test]
    fn test_struct_fields_in_declaration_order() {
        let sample = Sample {
            id: 7,
            name: "x".into(),
            values: vec![-1],
        };
        assert_eq!(
            sample.to_bytes(),
            vec![7, 0, 0, 0, 1, 0, 0, 0, b'x', 1, 0, 0, 0, 0xFF, 0xFF]
        );
        assert_eq!(Sample::from_bytes(&sample.to_bytes()).unwrap(), sample);
    }

    #[test]
    fn test_enum_rejects_unknown_value() {
        assert_eq!(Mode::from_bytes(&[2, 0, 0, 0]).unwrap(), Mode::On);
        assert!(Mode::from_bytes(&[1, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_null_array_decodes_empty() {
        let values: Vec<u32> = Vec::from_bytes(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert!(values.is_empty());
    }
}
