// src/core/resource/mod.rs

//! Cluster-transparent resources: files, directories, and the identifiers that
//! name them.

pub mod directory;
pub mod file;
pub mod http_index;
pub mod identifier;
mod source;

pub use directory::ClusterDirectory;
pub use file::ClusterFile;
pub use identifier::ResourceId;
