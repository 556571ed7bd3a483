// src/core/protocol/message.rs

//! Payload messages carried inside frames, encoded with `bincode`.

use crate::core::ClusterError;
use bincode::config;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Version tag exchanged in the handshake. Nodes with different versions refuse to link.
pub const PROTOCOL_VERSION: u32 = 1;

/// Sent by a follower as the first frame on a new link.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Hello {
    pub protocol_version: u32,
    pub node_index: u32,
}

/// The head's reply to an accepted `Hello`.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct Welcome {
    pub protocol_version: u32,
    pub followers: u32,
}

/// Whether a directory entry names a file or a subdirectory.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    bincode::Encode,
    bincode::Decode,
)]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a directory listing.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    bincode::Encode,
    bincode::Decode,
)]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// The body of one message on a pipe.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum PipeBody {
    /// The head opened the resource.
    Opened,
    /// The head failed to open the resource.
    OpenFailed { kind: String, message: String },
    /// A chunk of content, never empty.
    Data(Vec<u8>),
    /// Orderly end-of-stream.
    End,
    /// The head hit an error mid-stream.
    Error { kind: String, message: String },
    /// A directory listing, already sorted by the head.
    Listing(Vec<DirectoryEntry>),
    /// The outcome of a write on a network stream: bytes written, or `(kind, message)`.
    WriteOutcome(Result<u64, (String, String)>),
}

impl PipeBody {
    /// A short label for logs and desync reports.
    pub fn label(&self) -> &'static str {
        match self {
            PipeBody::Opened => "Opened",
            PipeBody::OpenFailed { .. } => "OpenFailed",
            PipeBody::Data(_) => "Data",
            PipeBody::End => "End",
            PipeBody::Error { .. } => "Error",
            PipeBody::Listing(_) => "Listing",
            PipeBody::WriteOutcome(_) => "WriteOutcome",
        }
    }
}

/// A pipe message: the body tagged with the id of the pipe it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct PipeMessage {
    pub pipe_id: u64,
    pub body: PipeBody,
}

/// Encodes a message with the standard `bincode` configuration.
pub fn encode_message<T: bincode::Encode>(message: &T) -> Result<Bytes, ClusterError> {
    let encoded = bincode::encode_to_vec(message, config::standard())?;
    Ok(Bytes::from(encoded))
}

/// Decodes a message, rejecting trailing bytes.
pub fn decode_message<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, ClusterError> {
    let (message, read) = bincode::decode_from_slice::<T, _>(bytes, config::standard())?;
    if read != bytes.len() {
        return Err(ClusterError::ProtocolDesync(format!(
            "{} trailing bytes after message",
            bytes.len() - read
        )));
    }
    Ok(message)
}
