//! OPC-UA binary decoder

use crate::encoding::BinaryEncodable;
use crate::error::{UaError, UaResult};

/// Maximum nesting of recursive types (Variant, DataValue, DiagnosticInfo)
pub const MAX_DECODING_DEPTH: usize = 64;

/// Decoder for the OPC-UA binary format
pub struct BinaryDecoder<'a> {
    buffer: &'a [u8],
    position: usize,
    depth: usize,
}

impl<'a> BinaryDecoder<'a> {
    /// Create a new decoder
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
            depth: 0,
        }
    }

    /// Decode any decodable value
    pub fn decode<T: BinaryEncodable>(&mut self) -> UaResult<T> {
        T::decode(self)
    }

    /// Current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Unconsumed bytes
    pub fn rest(&self) -> &'a [u8] {
        &self.buffer[self.position..]
    }

    /// Enter a nested structure, failing past the depth limit
    pub fn enter(&mut self) -> UaResult<()> {
        if self.depth >= MAX_DECODING_DEPTH {
            return Err(UaError::Decoding(format!(
                "nesting depth exceeds {}",
                MAX_DECODING_DEPTH
            )));
        }
        self.depth += 1;
        Ok(())
    }

    /// Leave a nested structure entered with [`BinaryDecoder::enter`]
    pub fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Read `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> UaResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(UaError::Decoding(format!(
                "need {} bytes at offset {}, {} remaining",
                len,
                self.position,
                self.remaining()
            )));
        }
        let bytes = &self.buffer[self.position..self.position + len];
        self.position += len;
        Ok(bytes)
    }

    fn read_array_of<const N: usize>(&mut self) -> UaResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_bool(&mut self) -> UaResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> UaResult<u8> {
        Ok(self.read_array_of::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> UaResult<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> UaResult<u16> {
        Ok(u16::from_le_bytes(self.read_array_of()?))
    }

    pub fn read_i16(&mut self) -> UaResult<i16> {
        Ok(i16::from_le_bytes(self.read_array_of()?))
    }

    pub fn read_u32(&mut self) -> UaResult<u32> {
        Ok(u32::from_le_bytes(self.read_array_of()?))
    }

    pub fn read_i32(&mut self) -> UaResult<i32> {
        Ok(i32::from_le_bytes(self.read_array_of()?))
    }

    pub fn read_u64(&mut self) -> UaResult<u64> {
        Ok(u64::from_le_bytes(self.read_array_of()?))
    }

    pub fn read_i64(&mut self) -> UaResult<i64> {
        Ok(i64::from_le_bytes(self.read_array_of()?))
    }

    pub fn read_f32(&mut self) -> UaResult<f32> {
        Ok(f32::from_le_bytes(self.read_array_of()?))
    }

    pub fn read_f64(&mut self) -> UaResult<f64> {
        Ok(f64::from_le_bytes(self.read_array_of()?))
    }

    /// Read an i32 length prefix; `None` for the null marker (-1)
    ///
    /// # Errors
    ///
    /// Returns `UaError::Decoding` if the length is negative (other than -1)
    /// or larger than the remaining input.
    pub fn read_length(&mut self) -> UaResult<Option<usize>> {
        let len = self.read_i32()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(UaError::Decoding(format!("invalid length {}", len)));
        }
        let len = len as usize;
        // Every element occupies at least one byte
        if len > self.remaining() {
            return Err(UaError::Decoding(format!(
                "length {} exceeds remaining {} bytes",
                len,
                self.remaining()
            )));
        }
        Ok(Some(len))
    }

    /// Read a length-prefixed byte string
    pub fn read_byte_string(&mut self) -> UaResult<Option<Vec<u8>>> {
        match self.read_length()? {
            Some(len) => Ok(Some(self.read_bytes(len)?.to_vec())),
            None => Ok(None),
        }
    }

    /// Read a UTF-8 string
    pub fn read_string(&mut self) -> UaResult<Option<String>> {
        match self.read_byte_string()? {
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| UaError::Decoding(format!("invalid UTF-8 string: {}", e))),
            None => Ok(None),
        }
    }

    /// Read an array; the null array decodes as empty
    pub fn read_array<T: BinaryEncodable>(&mut self) -> UaResult<Vec<T>> {
        Ok(self.read_optional_array()?.unwrap_or_default())
    }

    /// Read an array, distinguishing null from empty
    pub fn read_optional_array<T: BinaryEncodable>(&mut self) -> UaResult<Option<Vec<T>>> {
        match self.read_length()? {
            Some(len) => {
                let mut values = Vec::with_capacity(len);
                for _ in 0..len {
                    values.push(T::decode(self)?);
                }
                Ok(Some(values))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncated_input() {
        let mut decoder = BinaryDecoder::new(&[0x01, 0x02]);
        assert!(matches!(decoder.read_u32(), Err(UaError::Decoding(_))));
    }

    #[test]
    fn test_null_string() {
        let mut decoder = BinaryDecoder::new(&[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(decoder.read_string().unwrap(), None);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_length_larger_than_input_rejected() {
        let mut decoder = BinaryDecoder::new(&[0x10, 0x00, 0x00, 0x00, b'a']);
        assert!(decoder.read_string().is_err());
    }

    #[test]
    fn test_depth_limit() {
        let mut decoder = BinaryDecoder::new(&[]);
        for _ in 0..MAX_DECODING_DEPTH {
            decoder.enter().unwrap();
        }
        assert!(decoder.enter().is_err());
        decoder.leave();
        assert!(decoder.enter().is_ok());
    }
}
