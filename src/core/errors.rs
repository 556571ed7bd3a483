// src/core/errors.rs

//! Defines the primary error type for the cluster-transparent I/O layer.

use crate::core::role::Peer;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing every failure a node can observe.
///
/// Failures that originate on the head (open failures, mid-stream I/O errors) are
/// mirrored to the followers as `(kind, message)` pairs, so the variants that carry them
/// hold plain strings and compare equal across nodes.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("HTTP client error: {0}")]
    HttpClientError(String),

    #[error("Codec error: {0}")]
    Codec(String),

    /// The transport to a peer failed or was closed.
    #[error("Connection lost to {node}")]
    ConnectionLost { node: Peer },

    /// The head could not open the resource. Raised identically on every node.
    #[error("Failed to open '{identifier}': {kind}: {message}")]
    ResourceOpenFailed {
        identifier: String,
        kind: String,
        message: String,
    },

    /// The head hit an I/O error while streaming. Raised identically on every node.
    #[error("Stream error: {kind}: {message}")]
    StreamError { kind: String, message: String },

    /// A frame arrived out of place. Fatal for the session.
    #[error("Protocol desync: {0}")]
    ProtocolDesync(String),

    #[error("Invalid resource identifier: {0}")]
    InvalidResourceIdentifier(String),

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Internal Error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// Returns true for errors after which the session cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClusterError::ProtocolDesync(_))
    }

    /// Splits a head-side failure into the `(kind, message)` pair broadcast to followers.
    pub fn describe(&self) -> (String, String) {
        match self {
            ClusterError::Io(e) => (format!("{:?}", e.kind()), e.to_string()),
            ClusterError::HttpClientError(m) => ("Http".to_string(), m.clone()),
            ClusterError::InvalidResourceIdentifier(m) => {
                ("InvalidResourceIdentifier".to_string(), m.clone())
            }
            ClusterError::InvalidState(m) => ("InvalidState".to_string(), m.clone()),
            ClusterError::Codec(m) => ("Codec".to_string(), m.clone()),
            ClusterError::ResourceOpenFailed { kind, message, .. }
            | ClusterError::StreamError { kind, message } => (kind.clone(), message.clone()),
            other => ("Other".to_string(), other.to_string()),
        }
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for ClusterError {
    fn clone(&self) -> Self {
        match self {
            ClusterError::Io(e) => ClusterError::Io(Arc::clone(e)),
            ClusterError::IncompleteData => ClusterError::IncompleteData,
            ClusterError::HttpClientError(s) => ClusterError::HttpClientError(s.clone()),
            ClusterError::Codec(s) => ClusterError::Codec(s.clone()),
            ClusterError::ConnectionLost { node } => ClusterError::ConnectionLost { node: *node },
            ClusterError::ResourceOpenFailed {
                identifier,
                kind,
                message,
            } => ClusterError::ResourceOpenFailed {
                identifier: identifier.clone(),
                kind: kind.clone(),
                message: message.clone(),
            },
            ClusterError::StreamError { kind, message } => ClusterError::StreamError {
                kind: kind.clone(),
                message: message.clone(),
            },
            ClusterError::ProtocolDesync(s) => ClusterError::ProtocolDesync(s.clone()),
            ClusterError::InvalidResourceIdentifier(s) => {
                ClusterError::InvalidResourceIdentifier(s.clone())
            }
            ClusterError::InvalidState(s) => ClusterError::InvalidState(s.clone()),
            ClusterError::Internal(s) => ClusterError::Internal(s.clone()),
        }
    }
}

impl PartialEq for ClusterError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ClusterError::Io(e1), ClusterError::Io(e2)) => e1.to_string() == e2.to_string(),
            (ClusterError::HttpClientError(s1), ClusterError::HttpClientError(s2)) => s1 == s2,
            (ClusterError::Codec(s1), ClusterError::Codec(s2)) => s1 == s2,
            (ClusterError::ConnectionLost { node: n1 }, ClusterError::ConnectionLost { node: n2 }) => {
                n1 == n2
            }
            (
                ClusterError::ResourceOpenFailed {
                    identifier: i1,
                    kind: k1,
                    message: m1,
                },
                ClusterError::ResourceOpenFailed {
                    identifier: i2,
                    kind: k2,
                    message: m2,
                },
            ) => i1 == i2 && k1 == k2 && m1 == m2,
            (
                ClusterError::StreamError {
                    kind: k1,
                    message: m1,
                },
                ClusterError::StreamError {
                    kind: k2,
                    message: m2,
                },
            ) => k1 == k2 && m1 == m2,
            (ClusterError::ProtocolDesync(s1), ClusterError::ProtocolDesync(s2)) => s1 == s2,
            (
                ClusterError::InvalidResourceIdentifier(s1),
                ClusterError::InvalidResourceIdentifier(s2),
            ) => s1 == s2,
            (ClusterError::InvalidState(s1), ClusterError::InvalidState(s2)) => s1 == s2,
            (ClusterError::Internal(s1), ClusterError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ClusterError {
    fn from(e: std::io::Error) -> Self {
        ClusterError::Io(Arc::new(e))
    }
}

impl From<reqwest::Error> for ClusterError {
    fn from(e: reqwest::Error) -> Self {
        ClusterError::HttpClientError(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for ClusterError {
    fn from(e: bincode::error::EncodeError) -> Self {
        ClusterError::Codec(format!("failed to encode message: {e}"))
    }
}

impl From<bincode::error::DecodeError> for ClusterError {
    fn from(e: bincode::error::DecodeError) -> Self {
        ClusterError::ProtocolDesync(format!("failed to decode message: {e}"))
    }
}

impl From<url::ParseError> for ClusterError {
    fn from(e: url::ParseError) -> Self {
        ClusterError::InvalidResourceIdentifier(e.to_string())
    }
}
