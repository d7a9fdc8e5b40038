//! Secure channel statistics
//!
//! Counters are updated by the reader and writer tasks and the correlator;
//! [`ChannelStatistics::snapshot`] returns a consistent-enough copy for
//! monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the channel counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelStatisticsSnapshot {
    /// Chunks written to the transport
    pub chunks_sent: u64,
    /// Chunks read from the transport
    pub chunks_received: u64,
    /// Complete messages written
    pub messages_sent: u64,
    /// Complete messages reassembled
    pub messages_received: u64,
    /// Successful token renewals
    pub renewals: u64,
    /// Requests resolved by timeout
    pub timeouts: u64,
    /// Responses with no pending request (late or duplicate)
    pub discarded_responses: u64,
    /// Messages failed by an abort chunk or a size limit
    pub aborted_messages: u64,
}

impl ChannelStatisticsSnapshot {
    /// Fraction of requests that timed out
    pub fn timeout_rate(&self) -> f64 {
        if self.messages_sent == 0 {
            0.0
        } else {
            self.timeouts as f64 / self.messages_sent as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct ChannelStatistics {
    chunks_sent: AtomicU64,
    chunks_received: AtomicU64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    renewals: AtomicU64,
    timeouts: AtomicU64,
    discarded_responses: AtomicU64,
    aborted_messages: AtomicU64,
}

impl ChannelStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_chunks_sent(&self, count: u64) {
        self.chunks_sent.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_chunks_received(&self) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_messages_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_renewals(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timeouts(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_discarded_responses(&self) {
        self.discarded_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_aborted_messages(&self) {
        self.aborted_messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ChannelStatisticsSnapshot {
        ChannelStatisticsSnapshot {
            chunks_sent: self.chunks_sent.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            discarded_responses: self.discarded_responses.load(Ordering::Relaxed),
            aborted_messages: self.aborted_messages.load(Ordering::Relaxed),
        }
    }
}
