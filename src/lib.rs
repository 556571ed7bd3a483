// src/lib.rs

pub mod config;
pub mod core;
pub mod node;

// Re-export
pub use crate::core::{
    ClusterDirectory, ClusterError, ClusterEvent, ClusterFile, ClusterSession, Multiplexer,
    NodeRole, ReduceOp, ResourceId,
};
