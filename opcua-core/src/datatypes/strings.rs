//! ByteString, QualifiedName and LocalizedText

use crate::encoding::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use crate::error::UaResult;
use std::fmt;

/// Byte string that keeps the null/empty distinction
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ByteString(pub Option<Vec<u8>>);

impl ByteString {
    pub fn null() -> Self {
        Self(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }

    /// Bytes, treating null as empty
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_deref().unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

impl From<Vec<u8>> for ByteString {
    fn from(value: Vec<u8>) -> Self {
        Self(Some(value))
    }
}

impl From<&[u8]> for ByteString {
    fn from(value: &[u8]) -> Self {
        Self(Some(value.to_vec()))
    }
}

impl BinaryEncodable for ByteString {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        encoder.write_byte_string(self.0.as_deref());
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        Ok(Self(decoder.read_byte_string()?))
    }
}

/// Name qualified by a namespace index, used for browse names
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct QualifiedName {
    pub namespace_index: u16,
    pub name: String,
}

impl QualifiedName {
    pub fn new(namespace_index: u16, name: impl Into<String>) -> Self {
        Self {
            namespace_index,
            name: name.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.namespace_index == 0 && self.name.is_empty()
    }
}

impl From<&str> for QualifiedName {
    fn from(value: &str) -> Self {
        Self::new(0, value)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace_index == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.namespace_index, self.name)
        }
    }
}

impl BinaryEncodable for QualifiedName {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        encoder.write_u16(self.namespace_index);
        encoder.write_string(Some(&self.name));
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let namespace_index = decoder.read_u16()?;
        let name = decoder.read_string()?.unwrap_or_default();
        Ok(Self {
            namespace_index,
            name,
        })
    }
}

/// Human-readable text with an optional locale
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct LocalizedText {
    pub locale: Option<String>,
    pub text: Option<String>,
}

impl LocalizedText {
    pub fn new(locale: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            locale: Some(locale.into()),
            text: Some(text.into()),
        }
    }

    /// Text, or empty when absent
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }
}

impl From<&str> for LocalizedText {
    fn from(value: &str) -> Self {
        Self {
            locale: None,
            text: Some(value.to_string()),
        }
    }
}

impl fmt::Display for LocalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

impl BinaryEncodable for LocalizedText {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        let mut mask = 0u8;
        if self.locale.is_some() {
            mask |= 0x01;
        }
        if self.text.is_some() {
            mask |= 0x02;
        }
        encoder.write_u8(mask);
        if let Some(locale) = &self.locale {
            encoder.write_string(Some(locale));
        }
        if let Some(text) = &self.text {
            encoder.write_string(Some(text));
        }
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let mask = decoder.read_u8()?;
        let locale = if mask & 0x01 != 0 {
            decoder.read_string()?
        } else {
            None
        };
        let text = if mask & 0x02 != 0 {
            decoder.read_string()?
        } else {
            None
        };
        Ok(Self { locale, text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localized_text_mask() {
        let text = LocalizedText::from("Hello");
        let bytes = text.to_bytes();
        assert_eq!(bytes[0], 0x02);
        assert_eq!(LocalizedText::from_bytes(&bytes).unwrap(), text);
        assert_eq!(LocalizedText::default().to_bytes(), vec![0x00]);
    }

    #[test]
    fn test_byte_string_null_preserved() {
        let null = ByteString::null();
        assert_eq!(null.to_bytes(), vec![0xFF; 4]);
        assert!(ByteString::from_bytes(&null.to_bytes()).unwrap().is_null());
    }

    #[test]
    fn test_qualified_name_display() {
        assert_eq!(QualifiedName::new(0, "State").to_string(), "State");
        assert_eq!(QualifiedName::new(3, "Speed").to_string(), "3:Speed");
    }
}
