//! DiagnosticInfo

use crate::encoding::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use crate::error::UaResult;
use crate::status_code::StatusCode;

const SYMBOLIC_ID: u8 = 0x01;
const NAMESPACE_URI: u8 = 0x02;
const LOCALIZED_TEXT: u8 = 0x04;
const LOCALE: u8 = 0x08;
const ADDITIONAL_INFO: u8 = 0x10;
const INNER_STATUS_CODE: u8 = 0x20;
const INNER_DIAGNOSTIC_INFO: u8 = 0x40;

/// Vendor diagnostics attached to a result; string fields index the
/// response header's string table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagnosticInfo {
    pub symbolic_id: Option<i32>,
    pub namespace_uri: Option<i32>,
    pub localized_text: Option<i32>,
    pub locale: Option<i32>,
    pub additional_info: Option<String>,
    pub inner_status_code: Option<StatusCode>,
    pub inner_diagnostic_info: Option<Box<DiagnosticInfo>>,
}

fn read_index(decoder: &mut BinaryDecoder<'_>, mask: u8, bit: u8) -> UaResult<Option<i32>> {
    if mask & bit != 0 {
        Ok(Some(decoder.read_i32()?))
    } else {
        Ok(None)
    }
}

impl BinaryEncodable for DiagnosticInfo {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        let mut mask = 0u8;
        if self.symbolic_id.is_some() {
            mask |= SYMBOLIC_ID;
        }
        if self.namespace_uri.is_some() {
            mask |= NAMESPACE_URI;
        }
        if self.localized_text.is_some() {
            mask |= LOCALIZED_TEXT;
        }
        if self.locale.is_some() {
            mask |= LOCALE;
        }
        if self.additional_info.is_some() {
            mask |= ADDITIONAL_INFO;
        }
        if self.inner_status_code.is_some() {
            mask |= INNER_STATUS_CODE;
        }
        if self.inner_diagnostic_info.is_some() {
            mask |= INNER_DIAGNOSTIC_INFO;
        }
        encoder.write_u8(mask);
        for index in [
            self.symbolic_id,
            self.namespace_uri,
            self.localized_text,
            self.locale,
        ]
        .into_iter()
        .flatten()
        {
            encoder.write_i32(index);
        }
        if let Some(info) = &self.additional_info {
            encoder.write_string(Some(info));
        }
        if let Some(status) = &self.inner_status_code {
            status.encode(encoder);
        }
        if let Some(inner) = &self.inner_diagnostic_info {
            inner.encode(encoder);
        }
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let mask = decoder.read_u8()?;
        let symbolic_id = read_index(decoder, mask, SYMBOLIC_ID)?;
        let namespace_uri = read_index(decoder, mask, NAMESPACE_URI)?;
        let localized_text = read_index(decoder, mask, LOCALIZED_TEXT)?;
        let locale = read_index(decoder, mask, LOCALE)?;
        let additional_info = if mask & ADDITIONAL_INFO != 0 {
            decoder.read_string()?
        } else {
            None
        };
        let inner_status_code = if mask & INNER_STATUS_CODE != 0 {
            Some(StatusCode::decode(decoder)?)
        } else {
            None
        };
        let inner_diagnostic_info = if mask & INNER_DIAGNOSTIC_INFO != 0 {
            decoder.enter()?;
            let inner = DiagnosticInfo::decode(decoder);
            decoder.leave();
            Some(Box::new(inner?))
        } else {
            None
        };
        Ok(Self {
            symbolic_id,
            namespace_uri,
            localized_text,
            locale,
            additional_info,
            inner_status_code,
            inner_diagnostic_info,
        })
    }
}
