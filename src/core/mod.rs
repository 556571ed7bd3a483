// src/core/mod.rs

//! The central module containing the cluster-transparency layer: wire protocol,
//! multiplexer, pipes, and the resources built on them.

pub mod errors;
pub mod metrics;
pub mod multiplexer;
pub mod pipe;
pub mod protocol;
pub mod resource;
pub mod role;
pub mod session;
pub mod tls;

pub use errors::ClusterError;
pub use multiplexer::{ClusterEvent, Multiplexer, ReduceOp};
pub use resource::{ClusterDirectory, ClusterFile, ResourceId};
pub use role::{NodeRole, Peer};
pub use session::ClusterSession;
