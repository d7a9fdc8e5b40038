//! DataValue: a value with its status and timestamps

use crate::datatypes::date_time::DateTime;
use crate::datatypes::variant::Variant;
use crate::encoding::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use crate::error::UaResult;
use crate::status_code::StatusCode;

const VALUE: u8 = 0x01;
const STATUS: u8 = 0x02;
const SOURCE_TIMESTAMP: u8 = 0x04;
const SERVER_TIMESTAMP: u8 = 0x08;
const SOURCE_PICOSECONDS: u8 = 0x10;
const SERVER_PICOSECONDS: u8 = 0x20;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataValue {
    pub value: Option<Variant>,
    pub status: Option<StatusCode>,
    pub source_timestamp: Option<DateTime>,
    pub source_picoseconds: Option<u16>,
    pub server_timestamp: Option<DateTime>,
    pub server_picoseconds: Option<u16>,
}

impl DataValue {
    /// A value without status or timestamps
    pub fn new(value: impl Into<Variant>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    /// A value-less result carrying only a status
    pub fn from_status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Status, Good if absent
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::GOOD)
    }

    pub fn is_good(&self) -> bool {
        self.status().is_good()
    }

    pub fn value(&self) -> &Variant {
        static EMPTY: Variant = Variant::Empty;
        self.value.as_ref().unwrap_or(&EMPTY)
    }
}

impl BinaryEncodable for DataValue {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        let mut mask = 0u8;
        if self.value.is_some() {
            mask |= VALUE;
        }
        if self.status.is_some() {
            mask |= STATUS;
        }
        if self.source_timestamp.is_some() {
            mask |= SOURCE_TIMESTAMP;
        }
        if self.server_timestamp.is_some() {
            mask |= SERVER_TIMESTAMP;
        }
        if self.source_picoseconds.is_some() {
            mask |= SOURCE_PICOSECONDS;
        }
        if self.server_picoseconds.is_some() {
            mask |= SERVER_PICOSECONDS;
        }
        encoder.write_u8(mask);
        if let Some(value) = &self.value {
            value.encode(encoder);
        }
        if let Some(status) = &self.status {
            status.encode(encoder);
        }
        if let Some(ts) = &self.source_timestamp {
            ts.encode(encoder);
        }
        if let Some(ps) = self.source_picoseconds {
            encoder.write_u16(ps);
        }
        if let Some(ts) = &self.server_timestamp {
            ts.encode(encoder);
        }
        if let Some(ps) = self.server_picoseconds {
            encoder.write_u16(ps);
        }
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let mask = decoder.read_u8()?;
        let value = if mask & VALUE != 0 {
            Some(Variant::decode(decoder)?)
        } else {
            None
        };
        let status = if mask & STATUS != 0 {
            Some(StatusCode::decode(decoder)?)
        } else {
            None
        };
        let source_timestamp = if mask & SOURCE_TIMESTAMP != 0 {
            Some(DateTime::decode(decoder)?)
        } else {
            None
        };
        let source_picoseconds = if mask & SOURCE_PICOSECONDS != 0 {
            Some(decoder.read_u16()?)
        } else {
            None
        };
        let server_timestamp = if mask & SERVER_TIMESTAMP != 0 {
            Some(DateTime::decode(decoder)?)
        } else {
            None
        };
        let server_picoseconds = if mask & SERVER_PICOSECONDS != 0 {
            Some(decoder.read_u16()?)
        } else {
            None
        };
        Ok(Self {
            value,
            status,
            source_timestamp,
            source_picoseconds,
            server_timestamp,
            server_picoseconds,
        })
    }
}
