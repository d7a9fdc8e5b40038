//! Ordering of notification messages within one subscription
//!
//! Sequence numbers start at 1, increase by one per data message and wrap
//! from `u32::MAX` to 1. The tracker buffers messages that arrive ahead of
//! the next expected number, reports the numbers that have to be fetched
//! with Republish, and releases messages strictly in order once the gap is
//! filled or declared lost.

use opcua_service::NotificationMessage;
use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;

/// Largest gap recovered with Republish; older missing numbers are lost
pub const MAX_REPUBLISH_GAP: u32 = 256;

const HALF_RANGE: u32 = 1 << 31;

/// Sequence number `steps` after `n`, skipping 0
pub fn advance(n: u32, steps: u32) -> u32 {
    let room = u32::MAX - n;
    if steps <= room { n + steps } else { steps - room }
}

/// Steps from `from` to `to`, skipping 0
pub fn distance(from: u32, to: u32) -> u32 {
    if to >= from {
        to - from
    } else {
        (u32::MAX - from) + to
    }
}

/// Output of [`SequenceTracker::drain`], in delivery order
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message(NotificationMessage),
    Lost(RangeInclusive<u32>),
}

/// Result of accepting a data message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// Buffered; `missing` lists the numbers to republish first
    Accepted { missing: Vec<u32> },
    Duplicate,
}

#[derive(Debug, Clone)]
pub struct SequenceTracker {
    expected: u32,
    buffered: HashMap<u32, NotificationMessage>,
    lost: HashSet<u32>,
    /// Every number before this one that is not buffered is lost
    skip_to: Option<u32>,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(expected: u32) -> Self {
        Self {
            expected: expected.max(1),
            buffered: HashMap::new(),
            lost: HashSet::new(),
            skip_to: None,
        }
    }

    /// Next sequence number to be delivered
    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn buffered(&self) -> usize {
        self.buffered.len()
    }

    /// Offset of `n` from the expected number, `None` if already delivered
    fn offset(&self, n: u32) -> Option<u32> {
        if n == 0 {
            return None;
        }
        let d = distance(self.expected, n);
        (d < HALF_RANGE).then_some(d)
    }

    /// Accept a data message received in a publish response
    pub fn receive(&mut self, message: NotificationMessage) -> Received {
        let n = message.sequence_number;
        let Some(offset) = self.offset(n) else {
            return Received::Duplicate;
        };
        if self.buffered.contains_key(&n) {
            return Received::Duplicate;
        }
        let missing = self.missing_before(offset);
        self.lost.remove(&n);
        self.buffered.insert(n, message);
        Received::Accepted { missing }
    }

    /// A keep-alive carries the next number the server will use, so every
    /// number before it should have arrived
    pub fn observe_keep_alive(&mut self, next: u32) -> Vec<u32> {
        match self.offset(next) {
            Some(offset) => self.missing_before(offset),
            None => Vec::new(),
        }
    }

    /// Store a message returned by Republish
    pub fn restore(&mut self, message: NotificationMessage) {
        let n = message.sequence_number;
        if self.offset(n).is_some() && !self.buffered.contains_key(&n) {
            self.lost.remove(&n);
            self.buffered.insert(n, message);
        }
    }

    /// Whether `n` is behind the next expected number
    pub fn is_delivered(&self, n: u32) -> bool {
        n != 0 && self.offset(n).is_none()
    }

    /// Numbers up to and including `last` still to be fetched
    pub fn missing_through(&mut self, last: u32) -> Vec<u32> {
        match self.offset(last) {
            Some(offset) => self.missing_before(offset + 1),
            None => Vec::new(),
        }
    }

    /// Give up on `n`
    pub fn mark_lost(&mut self, n: u32) {
        if self.offset(n).is_some() && !self.buffered.contains_key(&n) {
            self.lost.insert(n);
        }
    }

    fn missing_before(&mut self, offset: u32) -> Vec<u32> {
        let mut start = self.expected;
        let mut count = offset;
        if offset > MAX_REPUBLISH_GAP {
            let skip = offset - MAX_REPUBLISH_GAP;
            let cut = advance(self.expected, skip);
            let further = match self.skip_to {
                Some(current) => distance(self.expected, current) >= skip,
                None => false,
            };
            if !further {
                self.skip_to = Some(cut);
            }
            start = cut;
            count = MAX_REPUBLISH_GAP;
        }

        let mut missing = Vec::new();
        let mut seq = start;
        for _ in 0..count {
            if !self.buffered.contains_key(&seq) && !self.lost.contains(&seq) {
                missing.push(seq);
            }
            seq = advance(seq, 1);
        }
        missing
    }

    /// Release everything that can be delivered in order
    pub fn drain(&mut self) -> Vec<Delivery> {
        let mut out = Vec::new();
        loop {
            if let Some(message) = self.buffered.remove(&self.expected) {
                out.push(Delivery::Message(message));
                self.expected = advance(self.expected, 1);
                continue;
            }
            if self.lost.remove(&self.expected) {
                push_lost(&mut out, self.expected, self.expected);
                self.expected = advance(self.expected, 1);
                continue;
            }
            if let Some(skip_to) = self.skip_to {
                let span = distance(self.expected, skip_to);
                if span == 0 || span >= HALF_RANGE {
                    self.skip_to = None;
                    continue;
                }
                let stop = self
                    .buffered
                    .keys()
                    .map(|n| distance(self.expected, *n))
                    .filter(|d| *d < span)
                    .min()
                    .unwrap_or(span);
                push_lost(&mut out, self.expected, advance(self.expected, stop - 1));
                self.expected = advance(self.expected, stop);
                continue;
            }
            break;
        }
        out
    }
}

fn push_lost(out: &mut Vec<Delivery>, first: u32, last: u32) {
    if let Some(Delivery::Lost(range)) = out.last_mut() {
        if advance(*range.end(), 1) == first {
            *range = *range.start()..=last;
            return;
        }
    }
    out.push(Delivery::Lost(first..=last));
}
