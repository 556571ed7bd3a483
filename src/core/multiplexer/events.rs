// src/core/multiplexer/events.rs

use std::fmt;

/// Structured failure notifications raised on the head. The layer reports them and
/// keeps going; whether to abort the run is up to the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A follower's link failed. It no longer receives broadcasts, and gathers and
    /// barriers stop waiting for it.
    FollowerLost {
        node: usize,
        /// The operation sequence number at which the loss was detected.
        sequence: u64,
        reason: String,
    },
}

impl fmt::Display for ClusterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterEvent::FollowerLost {
                node,
                sequence,
                reason,
            } => write!(f, "follower {node} lost at sequence {sequence}: {reason}"),
        }
    }
}
