//! OPC-UA binary encoder

use crate::encoding::BinaryEncodable;
use bytes::{BufMut, Bytes, BytesMut};

/// Encoder for the OPC-UA binary format (little-endian, length-prefixed)
pub struct BinaryEncoder {
    buffer: BytesMut,
}

impl BinaryEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Create a new encoder with initial capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Encode any encodable value
    pub fn encode<T: BinaryEncodable + ?Sized>(&mut self, value: &T) -> &mut Self {
        value.encode(self);
        self
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.put_u8(u8::from(value));
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buffer.put_i8(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buffer.put_u16_le(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buffer.put_i16_le(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buffer.put_u32_le(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buffer.put_i32_le(value);
    }

    pub fn write_u64(&mut self, value: u64) {
        self.buffer.put_u64_le(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buffer.put_i64_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buffer.put_f32_le(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buffer.put_f64_le(value);
    }

    /// Write raw bytes without a length prefix
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    /// Write a length-prefixed byte string; `None` encodes as length -1
    pub fn write_byte_string(&mut self, bytes: Option<&[u8]>) {
        match bytes {
            Some(bytes) => {
                self.write_i32(bytes.len() as i32);
                self.buffer.put_slice(bytes);
            }
            None => self.write_i32(-1),
        }
    }

    /// Write a UTF-8 string; `None` encodes as the null string
    pub fn write_string(&mut self, value: Option<&str>) {
        self.write_byte_string(value.map(str::as_bytes));
    }

    /// Write an array with its i32 length prefix
    pub fn write_array<T: BinaryEncodable>(&mut self, values: &[T]) {
        self.write_i32(values.len() as i32);
        for value in values {
            value.encode(self);
        }
    }

    /// Write an array that may be null (length -1)
    pub fn write_optional_array<T: BinaryEncodable>(&mut self, values: Option<&[T]>) {
        match values {
            Some(values) => self.write_array(values),
            None => self.write_i32(-1),
        }
    }

    /// Overwrite four bytes at `offset` with a little-endian u32
    ///
    /// Used to back-patch length fields once a message body is complete.
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the encoder, returning the encoded bytes
    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buffer.to_vec()
    }
}

impl Default for BinaryEncoder {
    fn default() -> Self {
        Self::new()
    }
}
