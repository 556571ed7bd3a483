// src/core/resource/directory.rs

//! The cluster-transparent directory: the head enumerates the real directory
//! (local or an HTTP index page) and broadcasts the sorted listing.

use super::file::{ClusterFile, open_failed};
use super::http_index;
use super::identifier::ResourceId;
use super::source::fetch;
use crate::core::ClusterError;
use crate::core::metrics;
use crate::core::pipe::Pipe;
use crate::core::protocol::{DirectoryEntry, EntryKind, PipeBody};
use crate::core::role::NodeRole;
use crate::core::session::ClusterSession;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What the head enumerates on `list_entries`.
enum Resolver {
    /// Rescanned on every listing.
    Local(PathBuf),
    /// Parsed once, when the directory was opened.
    Http(Vec<DirectoryEntry>),
}

pub struct ClusterDirectory {
    session: ClusterSession,
    identifier: ResourceId,
    pipe: Pipe,
    /// Head only.
    resolver: Option<Resolver>,
    closed: bool,
}

impl std::fmt::Debug for ClusterDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterDirectory")
            .field("identifier", &self.identifier)
            .field("pipe_id", &self.pipe.id())
            .field("closed", &self.closed)
            .finish()
    }
}

impl ClusterDirectory {
    /// Validates the directory on the head and mirrors the outcome to every follower.
    pub(crate) async fn open(
        session: &ClusterSession,
        identifier: ResourceId,
        mut pipe: Pipe,
    ) -> Result<Self, ClusterError> {
        let identifier = identifier.as_directory();
        let resolver = match session.role() {
            NodeRole::Head => match resolve(session, &identifier).await {
                Ok(resolver) => {
                    pipe.send(PipeBody::Opened).await?;
                    Some(resolver)
                }
                Err(e) => {
                    let (kind, message) = e.describe();
                    pipe.send(PipeBody::OpenFailed {
                        kind: kind.clone(),
                        message: message.clone(),
                    })
                    .await?;
                    return Err(open_failed(&identifier, &mut pipe, kind, message));
                }
            },
            NodeRole::Follower => match pipe.receive().await? {
                PipeBody::Opened => None,
                PipeBody::OpenFailed { kind, message } => {
                    return Err(open_failed(&identifier, &mut pipe, kind, message));
                }
                other => return Err(pipe.unexpected("an open outcome", &other).await),
            },
        };

        metrics::RESOURCES_OPENED_TOTAL
            .with_label_values(&[identifier.kind(), "ok"])
            .inc();
        info!(pipe_id = pipe.id(), "Opened directory '{identifier}'.");
        Ok(Self {
            session: session.clone(),
            identifier,
            pipe,
            resolver,
            closed: false,
        })
    }

    pub fn identifier(&self) -> &ResourceId {
        &self.identifier
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Lists the directory's entries in lexicographic order of name. Every node
    /// gets the head's list; repeated calls repeat the exchange.
    pub async fn list_entries(&mut self) -> Result<Vec<DirectoryEntry>, ClusterError> {
        self.ensure_open()?;
        let Some(resolver) = self.resolver.as_ref() else {
            return match self.pipe.receive().await? {
                PipeBody::Listing(entries) => Ok(entries),
                PipeBody::Error { kind, message } => {
                    Err(ClusterError::StreamError { kind, message })
                }
                other => Err(self.pipe.unexpected("a listing", &other).await),
            };
        };

        let listing = match resolver {
            Resolver::Local(path) => scan_local(path).await,
            Resolver::Http(entries) => Ok(entries.clone()),
        };
        let failure = match listing {
            Ok(mut entries) => {
                entries.sort();
                entries.dedup_by(|a, b| a.name == b.name);
                match self.pipe.send(PipeBody::Listing(entries.clone())).await {
                    Ok(()) => {
                        debug!(
                            pipe_id = self.pipe.id(),
                            entries = entries.len(),
                            "Listed '{}'.",
                            self.identifier
                        );
                        return Ok(entries);
                    }
                    // Too large for one frame. Nothing went out, so the error sentinel follows.
                    Err(e @ ClusterError::Codec(_)) => e,
                    Err(e) => return Err(e),
                }
            }
            Err(e) => e,
        };

        let (kind, message) = failure.describe();
        warn!("Listing '{}' failed: {kind}: {message}", self.identifier);
        self.pipe
            .send(PipeBody::Error {
                kind: kind.clone(),
                message: message.clone(),
            })
            .await?;
        Err(ClusterError::StreamError { kind, message })
    }

    /// Opens the file `name` inside this directory.
    pub async fn open_file(&self, name: &str) -> Result<ClusterFile, ClusterError> {
        self.ensure_open()?;
        let child = self.identifier.join(name)?;
        self.session.open_file_id(child).await
    }

    /// Opens the subdirectory `name`.
    pub async fn open_directory(&self, name: &str) -> Result<ClusterDirectory, ClusterError> {
        self.ensure_open()?;
        let child = self.identifier.join(name)?;
        self.session.open_directory_id(child).await
    }

    /// Opens the directory containing this one.
    pub async fn parent(&self) -> Result<ClusterDirectory, ClusterError> {
        self.ensure_open()?;
        let parent = self.identifier.parent()?;
        self.session.open_directory_id(parent).await
    }

    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ClusterError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.resolver = None;
        self.pipe.close().await
    }

    fn ensure_open(&self) -> Result<(), ClusterError> {
        if self.closed {
            return Err(ClusterError::InvalidState(format!(
                "directory '{}' is closed",
                self.identifier
            )));
        }
        Ok(())
    }
}

async fn resolve(session: &ClusterSession, identifier: &ResourceId) -> Result<Resolver, ClusterError> {
    match identifier {
        ResourceId::Local(path) => {
            let metadata = tokio::fs::metadata(path).await?;
            if !metadata.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    format!("'{}' is not a directory", path.display()),
                )
                .into());
            }
            Ok(Resolver::Local(path.clone()))
        }
        ResourceId::Http(url) => {
            let body = fetch(session.http_client(), url).await?.text().await?;
            Ok(Resolver::Http(http_index::parse_index(&body, url)))
        }
        other => Err(ClusterError::InvalidResourceIdentifier(format!(
            "'{other}' cannot be opened as a directory"
        ))),
    }
}

async fn scan_local(path: &Path) -> Result<Vec<DirectoryEntry>, ClusterError> {
    let mut entries = Vec::new();
    let mut dir = tokio::fs::read_dir(path).await?;
    while let Some(entry) = dir.next_entry().await? {
        // A name that is not UTF-8 could not be opened again through a child identifier.
        let Ok(name) = entry.file_name().into_string() else {
            warn!("Skipping non-UTF-8 entry {:?} in '{}'.", entry.file_name(), path.display());
            continue;
        };
        // Follows symlinks; a dangling link is listed as a file.
        let kind = match tokio::fs::metadata(entry.path()).await {
            Ok(metadata) if metadata.is_dir() => EntryKind::Directory,
            _ => EntryKind::File,
        };
        entries.push(DirectoryEntry { name, kind });
    }
    Ok(entries)
}
