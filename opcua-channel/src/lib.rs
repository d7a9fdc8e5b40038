//! UA-TCP secure channel for the OPC-UA client stack
//!
//! This crate runs the connection protocol on top of a transport:
//! - Hello/Acknowledge handshake and limit negotiation
//! - chunking, signing, encryption and reassembly of messages
//! - OpenSecureChannel issue and renewal with security tokens
//! - request/response correlation with timeouts and cancellation
//!
//! [`SecureChannel`] is the entry point; the other modules are public for
//! tooling and tests that speak the wire protocol directly.

pub mod channel;
pub mod chunk;
pub mod config;
pub mod correlator;
pub mod hello;
pub mod message;
pub mod reassembly;
pub mod sequence;
pub mod state;
pub mod statistics;
pub mod token;

pub use channel::SecureChannel;
pub use chunk::{
    AsymmetricSecurityHeader, ChunkPrefix, ChunkWriter, MessageChunk, Protection, SecurityHeader,
    SequenceHeader, open_chunk,
};
pub use config::ChannelConfig;
pub use correlator::{Correlator, PendingResponse};
pub use hello::{
    AcknowledgeMessage, ErrorMessage, HelloMessage, NegotiatedLimits, TransportLimits,
    frame_message,
};
pub use message::{ChunkType, MessageHeader, MessageType, read_chunk};
pub use sequence::{ReceiveSequence, SendSequence};
pub use state::ChannelState;
pub use statistics::ChannelStatisticsSnapshot;
pub use token::{SecurityToken, TokenSet};
