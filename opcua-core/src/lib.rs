//! Core types for the OPC-UA client stack
//!
//! This crate provides the building blocks shared by every layer:
//! the error taxonomy, status codes, the built-in data types and the
//! OPC-UA binary encoding.

pub mod datatypes;
pub mod encoding;
pub mod error;
pub mod ids;
pub mod status_code;

pub use datatypes::*;
pub use encoding::{BinaryDecoder, BinaryEncodable, BinaryEncoder, BinaryEncodingId};
pub use error::{ErrorClass, UaError, UaResult};
pub use ids::AttributeId;
pub use status_code::StatusCode;
