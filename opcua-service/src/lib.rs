//! OPC-UA service structures
//!
//! Request and response types for the service sets the client engine uses
//! (secure channel, session, attribute, view, subscription, monitored item),
//! together with the [`ServiceRequest`] / [`ServiceResponse`] envelope that
//! the secure channel encodes and decodes.

pub mod header;
pub mod message;
pub mod service;

pub use header::{RequestHeader, ResponseHeader};
pub use message::{ServiceFault, ServiceRequest, ServiceResponse, ServiceResponseType};
pub use service::*;
