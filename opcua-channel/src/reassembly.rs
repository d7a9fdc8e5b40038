//! Reassembly of multi-chunk messages
//!
//! Chunks of different requests may interleave; partial bodies are kept per
//! request id. Limits are checked on every chunk so a runaway message is
//! dropped before it is complete.

use crate::chunk::MessageChunk;
use crate::message::ChunkType;
use opcua_core::{StatusCode, UaError};
use std::collections::{HashMap, HashSet};

/// Outcome of adding one chunk
#[derive(Debug)]
pub enum Reassembled {
    /// More chunks are needed
    Incomplete,
    /// Complete message body
    Complete { request_id: u32, body: Vec<u8> },
    /// The message failed; only its own request is affected
    Failed { request_id: u32, error: UaError },
}

#[derive(Debug, Default)]
struct Partial {
    body: Vec<u8>,
    chunks: usize,
}

#[derive(Debug)]
pub struct MessageReassembler {
    partial: HashMap<u32, Partial>,
    /// Requests whose remaining chunks are dropped
    discarding: HashSet<u32>,
    /// 0 = unlimited
    max_message_size: usize,
    /// 0 = unlimited
    max_chunk_count: usize,
}

impl MessageReassembler {
    pub fn new(max_message_size: usize, max_chunk_count: usize) -> Self {
        Self {
            partial: HashMap::new(),
            discarding: HashSet::new(),
            max_message_size,
            max_chunk_count,
        }
    }

    /// Add a chunk
    ///
    /// # Returns
    /// * `Complete` - on the final chunk of a message within limits
    /// * `Failed` - on an abort chunk, or when the message exceeds a limit
    ///   (later chunks of that message are then ignored until its final one)
    /// * `Incomplete` - otherwise
    pub fn push(&mut self, chunk: MessageChunk) -> Reassembled {
        let request_id = chunk.request_id();
        match chunk.header.chunk_type {
            ChunkType::Abort if self.discarding.remove(&request_id) => Reassembled::Incomplete,
            ChunkType::Abort => {
                self.partial.remove(&request_id);
                let error = match chunk.abort_reason() {
                    Ok(reason) => {
                        log::debug!(
                            "Request {} aborted by server: {} {}",
                            request_id,
                            reason.error,
                            reason.reason
                        );
                        UaError::Service(reason.error)
                    }
                    Err(e) => UaError::Protocol(format!("malformed abort chunk: {}", e)),
                };
                Reassembled::Failed { request_id, error }
            }
            chunk_type if self.discarding.contains(&request_id) => {
                if chunk_type == ChunkType::Final {
                    self.discarding.remove(&request_id);
                }
                Reassembled::Incomplete
            }
            chunk_type => {
                let partial = self.partial.entry(request_id).or_default();
                partial.chunks += 1;
                partial.body.extend_from_slice(&chunk.body);

                if let Some(error) = self.exceeded(request_id) {
                    self.partial.remove(&request_id);
                    if chunk_type != ChunkType::Final {
                        self.discarding.insert(request_id);
                    }
                    return Reassembled::Failed { request_id, error };
                }
                if chunk_type == ChunkType::Final {
                    let body = self
                        .partial
                        .remove(&request_id)
                        .map(|p| p.body)
                        .unwrap_or_default();
                    Reassembled::Complete { request_id, body }
                } else {
                    Reassembled::Incomplete
                }
            }
        }
    }

    fn exceeded(&self, request_id: u32) -> Option<UaError> {
        let partial = self.partial.get(&request_id)?;
        if self.max_message_size != 0 && partial.body.len() > self.max_message_size {
            log::warn!(
                "Response to request {} exceeds {} bytes, discarding",
                request_id,
                self.max_message_size
            );
            return Some(UaError::Service(StatusCode::BAD_RESPONSE_TOO_LARGE));
        }
        if self.max_chunk_count != 0 && partial.chunks > self.max_chunk_count {
            log::warn!(
                "Response to request {} exceeds {} chunks, discarding",
                request_id,
                self.max_chunk_count
            );
            return Some(UaError::Service(StatusCode::BAD_RESPONSE_TOO_LARGE));
        }
        None
    }

    /// Forget a request whose response is no longer awaited
    ///
    /// Returns `true` if anything was held for it.
    pub fn discard(&mut self, request_id: u32) -> bool {
        let partial = self.partial.remove(&request_id).is_some();
        let discarding = self.discarding.remove(&request_id);
        partial || discarding
    }

    /// Number of messages currently being reassembled
    pub fn pending(&self) -> usize {
        self.partial.len()
    }

    /// Number of messages whose remaining chunks are being dropped
    pub fn discarding(&self) -> usize {
        self.discarding.len()
    }
}
