// src/core/role.rs

use serde::{Deserialize, Serialize};
use std::fmt;

/// The role of this process in the group, fixed for the process lifetime.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Head,
    Follower,
}

impl NodeRole {
    pub fn is_head(&self) -> bool {
        matches!(self, NodeRole::Head)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRole::Head => write!(f, "head"),
            NodeRole::Follower => write!(f, "follower"),
        }
    }
}

/// The remote end of a link, as seen from this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Peer {
    Head,
    /// A follower, by ordinal (`0..N-1`).
    Follower(usize),
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Head => write!(f, "head"),
            Peer::Follower(index) => write!(f, "follower {index}"),
        }
    }
}
