//! Secure channel sequence numbers
//!
//! ```text
//! 1, 2, ..., 4294966271, <wrap>, 1, 2, ...
//! ```
//!
//! After [`WRAP_THRESHOLD`] the counter restarts below 1024.

use opcua_core::{UaError, UaResult};

/// Last sequence number before the counter wraps
pub const WRAP_THRESHOLD: u32 = u32::MAX - 1024;

/// Receivers accept a wrapped number only below this value
const WRAP_LIMIT: u32 = 1024;

/// Send-side counter, owned by the writer task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSequence {
    next: u32,
}

impl Default for SendSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl SendSequence {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Start at an arbitrary number
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Take the next number
    pub fn next_number(&mut self) -> u32 {
        let current = self.next;
        self.next = if current >= WRAP_THRESHOLD { 1 } else { current + 1 };
        current
    }

    pub fn peek(&self) -> u32 {
        self.next
    }
}

/// Receive-side check that every chunk follows its predecessor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveSequence {
    last: Option<u32>,
}

impl ReceiveSequence {
    pub fn new() -> Self {
        Self { last: None }
    }

    /// Accept `number` if it is the successor of the last one
    ///
    /// # Errors
    ///
    /// Returns `UaError::Security` if a number is skipped or repeated.
    pub fn check(&mut self, number: u32) -> UaResult<()> {
        if let Some(last) = self.last {
            let expected = last.wrapping_add(1);
            let wrapped = last >= WRAP_THRESHOLD && number < WRAP_LIMIT;
            if number != expected && !wrapped {
                return Err(UaError::Security(format!(
                    "sequence number {} received, expected {}",
                    number, expected
                )));
            }
        }
        self.last = Some(number);
        Ok(())
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }
}
