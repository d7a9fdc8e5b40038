//! NodeId and ExpandedNodeId

use crate::datatypes::guid::Guid;
use crate::encoding::{BinaryDecoder, BinaryEncodable, BinaryEncoder};
use crate::error::{UaError, UaResult};
use std::fmt;
use std::str::FromStr;

const TWO_BYTE: u8 = 0x00;
const FOUR_BYTE: u8 = 0x01;
const NUMERIC: u8 = 0x02;
const STRING: u8 = 0x03;
const GUID: u8 = 0x04;
const BYTE_STRING: u8 = 0x05;
const NAMESPACE_URI_FLAG: u8 = 0x80;
const SERVER_INDEX_FLAG: u8 = 0x40;

/// Identifier part of a NodeId
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    Numeric(u32),
    String(String),
    Guid(Guid),
    ByteString(Vec<u8>),
}

/// Node identifier: namespace index plus identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub namespace: u16,
    pub identifier: Identifier,
}

impl NodeId {
    /// The null node id (ns=0;i=0)
    pub const NULL: NodeId = NodeId {
        namespace: 0,
        identifier: Identifier::Numeric(0),
    };

    pub fn numeric(namespace: u16, value: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(value),
        }
    }

    pub fn string(namespace: u16, value: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(value.into()),
        }
    }

    pub fn guid(namespace: u16, value: Guid) -> Self {
        Self {
            namespace,
            identifier: Identifier::Guid(value),
        }
    }

    pub fn byte_string(namespace: u16, value: Vec<u8>) -> Self {
        Self {
            namespace,
            identifier: Identifier::ByteString(value),
        }
    }

    /// Numeric node id in namespace 0
    pub const fn ns0(value: u32) -> Self {
        Self {
            namespace: 0,
            identifier: Identifier::Numeric(value),
        }
    }

    pub fn is_null(&self) -> bool {
        match &self.identifier {
            Identifier::Numeric(0) => self.namespace == 0,
            Identifier::String(s) => self.namespace == 0 && s.is_empty(),
            Identifier::Guid(g) => self.namespace == 0 && g.is_null(),
            Identifier::ByteString(b) => self.namespace == 0 && b.is_empty(),
            Identifier::Numeric(_) => false,
        }
    }

    /// Numeric value if this is `ns=0;i=<value>`
    pub fn as_ns0_numeric(&self) -> Option<u32> {
        match self.identifier {
            Identifier::Numeric(value) if self.namespace == 0 => Some(value),
            _ => None,
        }
    }

    fn encode_with_flags(&self, encoder: &mut BinaryEncoder, flags: u8) {
        match &self.identifier {
            Identifier::Numeric(value) if self.namespace == 0 && *value <= 0xFF => {
                encoder.write_u8(TWO_BYTE | flags);
                encoder.write_u8(*value as u8);
            }
            Identifier::Numeric(value) if self.namespace <= 0xFF && *value <= 0xFFFF => {
                encoder.write_u8(FOUR_BYTE | flags);
                encoder.write_u8(self.namespace as u8);
                encoder.write_u16(*value as u16);
            }
            Identifier::Numeric(value) => {
                encoder.write_u8(NUMERIC | flags);
                encoder.write_u16(self.namespace);
                encoder.write_u32(*value);
            }
            Identifier::String(value) => {
                encoder.write_u8(STRING | flags);
                encoder.write_u16(self.namespace);
                encoder.write_string(Some(value));
            }
            Identifier::Guid(value) => {
                encoder.write_u8(GUID | flags);
                encoder.write_u16(self.namespace);
                value.encode(encoder);
            }
            Identifier::ByteString(value) => {
                encoder.write_u8(BYTE_STRING | flags);
                encoder.write_u16(self.namespace);
                encoder.write_byte_string(Some(value));
            }
        }
    }

    fn decode_body(decoder: &mut BinaryDecoder<'_>, encoding: u8) -> UaResult<Self> {
        match encoding & 0x3F {
            TWO_BYTE => Ok(Self::ns0(u32::from(decoder.read_u8()?))),
            FOUR_BYTE => {
                let namespace = u16::from(decoder.read_u8()?);
                Ok(Self::numeric(namespace, u32::from(decoder.read_u16()?)))
            }
            NUMERIC => {
                let namespace = decoder.read_u16()?;
                Ok(Self::numeric(namespace, decoder.read_u32()?))
            }
            STRING => {
                let namespace = decoder.read_u16()?;
                Ok(Self::string(
                    namespace,
                    decoder.read_string()?.unwrap_or_default(),
                ))
            }
            GUID => {
                let namespace = decoder.read_u16()?;
                Ok(Self::guid(namespace, Guid::decode(decoder)?))
            }
            BYTE_STRING => {
                let namespace = decoder.read_u16()?;
                Ok(Self::byte_string(
                    namespace,
                    decoder.read_byte_string()?.unwrap_or_default(),
                ))
            }
            other => Err(UaError::Decoding(format!(
                "invalid NodeId encoding 0x{:02X}",
                other
            ))),
        }
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::NULL
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self::ns0(value)
    }
}

impl BinaryEncodable for NodeId {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        self.encode_with_flags(encoder, 0);
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let encoding = decoder.read_u8()?;
        if encoding & (NAMESPACE_URI_FLAG | SERVER_INDEX_FLAG) != 0 {
            return Err(UaError::Decoding(
                "expanded NodeId flags set on a NodeId".to_string(),
            ));
        }
        Self::decode_body(decoder, encoding)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace != 0 {
            write!(f, "ns={};", self.namespace)?;
        }
        match &self.identifier {
            Identifier::Numeric(value) => write!(f, "i={}", value),
            Identifier::String(value) => write!(f, "s={}", value),
            Identifier::Guid(value) => write!(f, "g={}", value),
            Identifier::ByteString(value) => {
                write!(f, "b=")?;
                for byte in value {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for NodeId {
    type Err = UaError;

    /// Parse the `ns=<n>;<i|s|g>=<value>` text form
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || UaError::InvalidArgument(format!("invalid node id: {}", s));
        let (namespace, rest) = match s.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, rest) = rest.split_once(';').ok_or_else(invalid)?;
                (ns.parse::<u16>().map_err(|_| invalid())?, rest)
            }
            None => (0, s),
        };
        let (kind, value) = rest.split_once('=').ok_or_else(invalid)?;
        match kind {
            "i" => Ok(Self::numeric(
                namespace,
                value.parse().map_err(|_| invalid())?,
            )),
            "s" => Ok(Self::string(namespace, value)),
            "g" => Ok(Self::guid(namespace, value.parse()?)),
            _ => Err(invalid()),
        }
    }
}

/// NodeId qualified by an optional namespace URI and server index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ExpandedNodeId {
    pub node_id: NodeId,
    pub namespace_uri: Option<String>,
    pub server_index: u32,
}

impl ExpandedNodeId {
    /// Local node id, if this refers to the local server by index
    pub fn to_local(&self) -> Option<NodeId> {
        if self.server_index == 0 && self.namespace_uri.is_none() {
            Some(self.node_id.clone())
        } else {
            None
        }
    }
}

impl From<NodeId> for ExpandedNodeId {
    fn from(node_id: NodeId) -> Self {
        Self {
            node_id,
            namespace_uri: None,
            server_index: 0,
        }
    }
}

impl BinaryEncodable for ExpandedNodeId {
    fn encode(&self, encoder: &mut BinaryEncoder) {
        let mut flags = 0;
        if self.namespace_uri.is_some() {
            flags |= NAMESPACE_URI_FLAG;
        }
        if self.server_index != 0 {
            flags |= SERVER_INDEX_FLAG;
        }
        self.node_id.encode_with_flags(encoder, flags);
        if let Some(uri) = &self.namespace_uri {
            encoder.write_string(Some(uri));
        }
        if self.server_index != 0 {
            encoder.write_u32(self.server_index);
        }
    }

    fn decode(decoder: &mut BinaryDecoder<'_>) -> UaResult<Self> {
        let encoding = decoder.read_u8()?;
        let node_id = NodeId::decode_body(decoder, encoding)?;
        let namespace_uri = if encoding & NAMESPACE_URI_FLAG != 0 {
            decoder.read_string()?
        } else {
            None
        };
        let server_index = if encoding & SERVER_INDEX_FLAG != 0 {
            decoder.read_u32()?
        } else {
            0
        };
        Ok(Self {
            node_id,
            namespace_uri,
            server_index,
        })
    }
}
