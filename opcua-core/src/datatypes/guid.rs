//! Guid

use crate::encoding::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use crate::error::{UaError, UaResult};
use std::fmt;
use std::str::FromStr;

/// 128-bit identifier, stored in its wire layout (Data1-3 little-endian)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Guid([u8; 16]);

impl Guid {
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; 16]
    }

    fn data1(&self) -> u32 {
        u32::from_le_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    fn data2(&self) -> u16 {
        u16::from_le_bytes([self.0[4], self.0[5]])
    }

    fn data3(&self) -> u16 {
        u16::from_le_bytes([self.0[6], self.0[7]])
    }
}

impl BinaryEncodable for Guid {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        encoder.write_bytes(&self.0);
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(decoder.read_bytes(16)?);
        Ok(Self(bytes))
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-",
            self.data1(),
            self.data2(),
            self.data3(),
            self.0[8],
            self.0[9]
        )?;
        for byte in &self.0[10..] {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

impl FromStr for Guid {
    type Err = UaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UaError::InvalidArgument(format!("invalid guid: {}", s));
        let hex: String = s.chars().filter(|c| *c != '-').collect();
        if hex.len() != 32 || s.len() != 36 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let mut raw = [0u8; 16];
        for (i, byte) in raw.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
        }
        // Textual form is big-endian for Data1-3
        raw[0..4].reverse();
        raw[4..6].reverse();
        raw[6..8].reverse();
        Ok(Self(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_form_uses_field_endianness() {
        let guid: Guid = "72962b91-fa75-4ae6-8d28-b404dc7daf63".parse().unwrap();
        assert_eq!(&guid.as_bytes()[..4], &[0x91, 0x2b, 0x96, 0x72]);
        assert_eq!(guid.to_string(), "72962b91-fa75-4ae6-8d28-b404dc7daf63");
    }

    #[test]
    fn test_invalid_guid() {
        assert!("not-a-guid".parse::<Guid>().is_err());
    }
}
