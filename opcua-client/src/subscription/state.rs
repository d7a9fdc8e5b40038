//! Subscription lifecycle

use std::fmt;

/// State of one subscription
///
/// ```text
///   Created ──first publish response──> Normal <──> Late
///      │                                  │          │
///      └──────────────────────────────────┴──────────┴──> Closed
/// ```
///
/// `Late` means too few publish requests are outstanding for the server to
/// deliver notifications when they are due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Created,
    Normal,
    Late,
    Closed,
}

impl SubscriptionState {
    pub fn can_transition_to(self, to: SubscriptionState) -> bool {
        use SubscriptionState::*;
        matches!(
            (self, to),
            (Created, Normal)
                | (Created, Late)
                | (Normal, Late)
                | (Late, Normal)
                | (Created | Normal | Late, Closed)
        )
    }

    pub fn is_closed(self) -> bool {
        self == SubscriptionState::Closed
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SubscriptionState::Created => "Created",
            SubscriptionState::Normal => "Normal",
            SubscriptionState::Late => "Late",
            SubscriptionState::Closed => "Closed",
        };
        f.write_str(name)
    }
}
