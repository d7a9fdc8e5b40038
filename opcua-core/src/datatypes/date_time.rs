//! DateTime: 100-nanosecond ticks since 1601-01-01 UTC

use crate::encoding::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use crate::error::UaResult;
use chrono::{TimeZone, Utc};
use std::fmt;

/// Ticks between 1601-01-01 and the Unix epoch
const UNIX_EPOCH_TICKS: i64 = 116_444_736_000_000_000;
const TICKS_PER_SECOND: i64 = 10_000_000;

/// OPC-UA DateTime
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct DateTime(i64);

impl DateTime {
    /// The minimum (null) date time
    pub const MIN: DateTime = DateTime(0);

    pub const fn from_ticks(ticks: i64) -> Self {
        Self(ticks)
    }

    pub const fn ticks(&self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Convert to a chrono timestamp; `None` if out of range
    pub fn to_chrono(&self) -> Option<chrono::DateTime<Utc>> {
        let since_epoch = self.0 - UNIX_EPOCH_TICKS;
        let secs = since_epoch.div_euclid(TICKS_PER_SECOND);
        let nanos = since_epoch.rem_euclid(TICKS_PER_SECOND) * 100;
        Utc.timestamp_opt(secs, nanos as u32).single()
    }
}

impl From<chrono::DateTime<Utc>> for DateTime {
    fn from(value: chrono::DateTime<Utc>) -> Self {
        let ticks = value.timestamp() * TICKS_PER_SECOND
            + i64::from(value.timestamp_subsec_nanos() / 100)
            + UNIX_EPOCH_TICKS;
        Self(ticks.max(0))
    }
}

impl BinaryEncodable for DateTime {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        encoder.write_i64(self.0);
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        Ok(Self(decoder.read_i64()?))
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_chrono() {
            Some(value) => write!(f, "{}", value.to_rfc3339()),
            None => write!(f, "ticks:{}", self.0),
        }
    }
}

impl fmt::Debug for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DateTime({})", self)
    }
}
