// src/core/resource/file.rs

//! The cluster-transparent file: on the head it reads the real resource and
//! broadcasts what it read; on followers it replays the broadcast content.

use super::identifier::ResourceId;
use super::source::HeadSource;
use crate::core::ClusterError;
use crate::core::metrics;
use crate::core::pipe::{Pipe, PipeRead};
use crate::core::protocol::PipeBody;
use crate::core::role::NodeRole;
use crate::core::session::ClusterSession;
use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

pub struct ClusterFile {
    identifier: ResourceId,
    pipe: Pipe,
    /// Head only.
    source: Option<HeadSource>,
    chunk_size: usize,
    closed: bool,
}

impl std::fmt::Debug for ClusterFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterFile")
            .field("identifier", &self.identifier)
            .field("pipe_id", &self.pipe.id())
            .field("closed", &self.closed)
            .finish()
    }
}

impl ClusterFile {
    /// Opens `identifier` on the head and mirrors the outcome to every follower.
    pub(crate) async fn open(
        session: &ClusterSession,
        identifier: ResourceId,
        mut pipe: Pipe,
    ) -> Result<Self, ClusterError> {
        let kind = identifier.kind();
        let source = match session.role() {
            NodeRole::Head => match HeadSource::open(&identifier, session).await {
                Ok(source) => {
                    pipe.send(PipeBody::Opened).await?;
                    Some(source)
                }
                Err(e) => {
                    let (err_kind, message) = e.describe();
                    pipe.send(PipeBody::OpenFailed {
                        kind: err_kind.clone(),
                        message: message.clone(),
                    })
                    .await?;
                    return Err(open_failed(&identifier, &mut pipe, err_kind, message));
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
            .with_label_values(&[kind, "ok"])
            .inc();
        info!(pipe_id = pipe.id(), "Opened {kind} resource '{identifier}'.");
        Ok(Self {
            identifier,
            pipe,
            source,
            chunk_size: session.io().chunk_size,
            closed: false,
        })
    }

    pub fn identifier(&self) -> &ResourceId {
        &self.identifier
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Reads up to `max` bytes. Returns empty `Bytes` at end-of-stream, every time.
    ///
    /// On the head this performs real I/O; on followers it only replays what the
    /// head broadcast. A `max` of zero returns empty bytes without any traffic.
    pub async fn read(&mut self, max: usize) -> Result<Bytes, ClusterError> {
        self.ensure_open()?;
        if max == 0 {
            return Ok(Bytes::new());
        }
        if let Some(chunk) = self.pipe.take_replay(max) {
            return Ok(chunk);
        }

        let Some(source) = self.source.as_mut() else {
            return match self.pipe.read(max).await? {
                PipeRead::Data(chunk) => Ok(chunk),
                PipeRead::End => Ok(Bytes::new()),
            };
        };

        if let Some(outcome) = self.pipe.terminal() {
            return outcome;
        }
        match source.read_chunk(max.min(self.chunk_size)).await {
            Ok(chunk) if chunk.is_empty() => {
                debug!(pipe_id = self.pipe.id(), "end of stream");
                self.pipe.end().await?;
                Ok(Bytes::new())
            }
            Ok(chunk) => {
                self.pipe.write(chunk.clone()).await?;
                Ok(chunk)
            }
            Err(e) => {
                let (kind, message) = e.describe();
                warn!("Reading '{}' failed: {kind}: {message}", self.identifier);
                Err(self.pipe.fail(kind, message).await?)
            }
        }
    }

    /// Reads until end-of-stream and returns everything read.
    pub async fn read_to_end(&mut self) -> Result<Bytes, ClusterError> {
        let mut content = BytesMut::new();
        loop {
            let chunk = self.read(self.chunk_size).await?;
            if chunk.is_empty() {
                return Ok(content.freeze());
            }
            content.extend_from_slice(&chunk);
        }
    }

    /// Writes to a network stream. The head performs the write and broadcasts the
    /// outcome; followers return the same outcome without writing anything.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize, ClusterError> {
        self.ensure_open()?;
        let Some(source) = self.source.as_mut() else {
            return match self.pipe.receive().await? {
                PipeBody::WriteOutcome(Ok(written)) => Ok(written as usize),
                PipeBody::WriteOutcome(Err((kind, message))) => {
                    Err(ClusterError::StreamError { kind, message })
                }
                other => Err(self.pipe.unexpected("a write outcome", &other).await),
            };
        };

        let outcome = source.write_all(data).await.map_err(|e| e.describe());
        let mirrored = outcome.clone().map(|_| data.len() as u64);
        self.pipe.send(PipeBody::WriteOutcome(mirrored)).await?;
        match outcome {
            Ok(()) => Ok(data.len()),
            Err((kind, message)) => Err(ClusterError::StreamError { kind, message }),
        }
    }

    /// Restarts reading from the beginning of what was read so far, without any
    /// network traffic. Fails on every node alike once the recording limit was passed.
    pub fn rewind(&mut self) -> Result<(), ClusterError> {
        self.ensure_open()?;
        self.pipe.rewind()
    }

    /// Ends the stream in an orderly way and releases the real resource.
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ClusterError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self.pipe.close().await;
        if let Some(source) = self.source.take() {
            source.shutdown().await;
        }
        debug!(pipe_id = self.pipe.id(), "Closed '{}'.", self.identifier);
        result
    }

    fn ensure_open(&self) -> Result<(), ClusterError> {
        if self.closed {
            return Err(ClusterError::InvalidState(format!(
                "'{}' is closed",
                self.identifier
            )));
        }
        Ok(())
    }
}

/// Builds the error every node raises for a failed open.
pub(crate) fn open_failed(
    identifier: &ResourceId,
    pipe: &mut Pipe,
    kind: String,
    message: String,
) -> ClusterError {
    pipe.abandon();
    metrics::RESOURCES_OPENED_TOTAL
        .with_label_values(&[identifier.kind(), "failed"])
        .inc();
    warn!("Opening '{identifier}' failed: {kind}: {message}");
    ClusterError::ResourceOpenFailed {
        identifier: identifier.to_string(),
        kind,
        message,
    }
}
