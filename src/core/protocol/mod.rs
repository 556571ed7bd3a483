// src/core/protocol/mod.rs

pub mod frame;
pub mod message;

pub use frame::{Frame, FrameCodec, FrameKind};
pub use message::{DirectoryEntry, EntryKind, PipeBody, PipeMessage};
