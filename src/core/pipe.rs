// src/core/pipe.rs

//! A pipe is the logical byte stream of one open resource, layered on the
//! multiplexer. On the head it is a write conduit; on a follower it is a replay
//! source. Both sides record what passed through so the content can be rewound
//! without further network traffic.

use crate::core::ClusterError;
use crate::core::multiplexer::SharedMultiplexer;
use crate::core::protocol::message::{decode_message, encode_message};
use crate::core::protocol::frame::MAX_PAYLOAD_SIZE;
use crate::core::protocol::{PipeBody, PipeMessage};
use crate::core::role::NodeRole;
use bytes::Bytes;
use tracing::debug;

// Largest content slice per message, leaving room for the envelope.
const MAX_DATA_CHUNK: usize = MAX_PAYLOAD_SIZE / 2;

/// The outcome of a follower-side read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeRead {
    Data(Bytes),
    End,
}

#[derive(Debug, Clone)]
enum PipeState {
    Open,
    /// `End` was sent (head) or received (follower).
    Ended,
    /// An `Error` sentinel was sent or received. Reads repeat it.
    Failed(ClusterError),
    Closed,
}

/// The content that passed through a pipe, up to `limit` bytes.
#[derive(Debug)]
struct Recording {
    chunks: Vec<Bytes>,
    bytes: usize,
    limit: usize,
    overflowed: bool,
}

impl Recording {
    fn new(limit: usize) -> Self {
        Self {
            chunks: Vec::new(),
            bytes: 0,
            limit,
            overflowed: false,
        }
    }

    fn record(&mut self, chunk: &Bytes) {
        if self.overflowed {
            return;
        }
        if self.bytes + chunk.len() > self.limit {
            self.overflowed = true;
            self.chunks.clear();
            self.bytes = 0;
            return;
        }
        self.bytes += chunk.len();
        self.chunks.push(chunk.clone());
    }
}

/// Position of an in-progress replay within the recording.
#[derive(Debug, Clone, Copy)]
struct Replay {
    chunk: usize,
    offset: usize,
}

pub struct Pipe {
    id: u64,
    role: NodeRole,
    mux: SharedMultiplexer,
    state: PipeState,
    /// Follower: the unread tail of the last received chunk.
    leftover: Bytes,
    recording: Recording,
    replay: Option<Replay>,
}

impl Pipe {
    pub(crate) fn new(id: u64, role: NodeRole, mux: SharedMultiplexer, record_limit: usize) -> Self {
        debug!(pipe_id = id, "pipe allocated");
        Self {
            id,
            role,
            mux,
            state: PipeState::Open,
            leftover: Bytes::new(),
            recording: Recording::new(record_limit),
            replay: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, PipeState::Closed)
    }

    /// Head: broadcasts one message on this pipe.
    pub(crate) async fn send(&mut self, body: PipeBody) -> Result<(), ClusterError> {
        if !self.role.is_head() {
            return Err(ClusterError::InvalidState(
                "only the head sends on a pipe".into(),
            ));
        }
        let payload = encode_message(&PipeMessage {
            pipe_id: self.id,
            body,
        })?;
        self.mux.lock().await.broadcast(payload).await?;
        Ok(())
    }

    /// Follower: receives the next message and checks it belongs to this pipe.
    pub(crate) async fn receive(&mut self) -> Result<PipeBody, ClusterError> {
        if self.role.is_head() {
            return Err(ClusterError::InvalidState(
                "only followers receive on a pipe".into(),
            ));
        }
        let mut mux = self.mux.lock().await;
        let payload = mux.receive_broadcast().await?;
        let message: PipeMessage = match decode_message(&payload) {
            Ok(message) => message,
            Err(e) => return Err(mux.poison(e.to_string())),
        };
        if message.pipe_id != self.id {
            return Err(mux.poison(format!(
                "{} message for pipe {} arrived on pipe {}",
                message.body.label(),
                message.pipe_id,
                self.id
            )));
        }
        Ok(message.body)
    }

    /// Reports a message that does not fit the receiving operation.
    pub(crate) async fn unexpected(&self, expected: &str, got: &PipeBody) -> ClusterError {
        self.mux.lock().await.poison(format!(
            "expected {expected} on pipe {}, got {}",
            self.id,
            got.label()
        ))
    }

    /// Head: broadcasts content and records it. Content larger than one frame
    /// allows goes out as several messages.
    pub async fn write(&mut self, data: Bytes) -> Result<(), ClusterError> {
        if !matches!(self.state, PipeState::Open) {
            return Err(ClusterError::InvalidState(format!(
                "pipe {} is no longer open for writing",
                self.id
            )));
        }
        if data.is_empty() {
            return Ok(());
        }
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + MAX_DATA_CHUNK).min(data.len());
            let chunk = data.slice(offset..end);
            self.send(PipeBody::Data(chunk.to_vec())).await?;
            self.recording.record(&chunk);
            offset = end;
        }
        Ok(())
    }

    /// Head: sends the end-of-stream sentinel once.
    pub async fn end(&mut self) -> Result<(), ClusterError> {
        if matches!(self.state, PipeState::Open) {
            self.send(PipeBody::End).await?;
            self.state = PipeState::Ended;
        }
        Ok(())
    }

    /// Head: sends the error sentinel and returns the error every node will raise.
    pub async fn fail(&mut self, kind: String, message: String) -> Result<ClusterError, ClusterError> {
        self.send(PipeBody::Error {
            kind: kind.clone(),
            message: message.clone(),
        })
        .await?;
        let e = ClusterError::StreamError { kind, message };
        self.state = PipeState::Failed(e.clone());
        Ok(e)
    }

    /// Follower: reads up to `max` bytes of replayed content.
    ///
    /// Leftover bytes from an oversized chunk are returned before anything new is
    /// received, so fewer than `max` bytes come back only at a chunk boundary.
    pub async fn read(&mut self, max: usize) -> Result<PipeRead, ClusterError> {
        if let Some(chunk) = self.take_replay(max) {
            return Ok(PipeRead::Data(chunk));
        }
        if !self.leftover.is_empty() {
            let n = self.leftover.len().min(max);
            return Ok(PipeRead::Data(self.leftover.split_to(n)));
        }
        if let Some(outcome) = self.terminal() {
            return outcome.map(|_| PipeRead::End);
        }

        loop {
            match self.receive().await? {
                PipeBody::Data(bytes) if bytes.is_empty() => continue,
                PipeBody::Data(bytes) => {
                    let mut chunk = Bytes::from(bytes);
                    self.recording.record(&chunk);
                    if chunk.len() > max {
                        self.leftover = chunk.split_off(max);
                    }
                    return Ok(PipeRead::Data(chunk));
                }
                PipeBody::End => {
                    self.state = PipeState::Ended;
                    return Ok(PipeRead::End);
                }
                PipeBody::Error { kind, message } => {
                    let e = ClusterError::StreamError { kind, message };
                    self.state = PipeState::Failed(e.clone());
                    return Err(e);
                }
                other => return Err(self.unexpected("stream data", &other).await),
            }
        }
    }

    /// The repeated outcome of a finished stream: empty bytes at end-of-stream,
    /// the original error after a failure. `None` while the stream is open.
    pub(crate) fn terminal(&self) -> Option<Result<Bytes, ClusterError>> {
        match &self.state {
            PipeState::Open => None,
            PipeState::Ended => Some(Ok(Bytes::new())),
            PipeState::Failed(e) => Some(Err(e.clone())),
            PipeState::Closed => Some(Err(ClusterError::InvalidState(format!(
                "pipe {} is closed",
                self.id
            )))),
        }
    }

    /// Serves the next replayed chunk after a `rewind`, if any remain.
    pub(crate) fn take_replay(&mut self, max: usize) -> Option<Bytes> {
        if max == 0 {
            return None;
        }
        let replay = self.replay.as_mut()?;
        while let Some(chunk) = self.recording.chunks.get(replay.chunk) {
            let remaining = chunk.len() - replay.offset;
            if remaining == 0 {
                replay.chunk += 1;
                replay.offset = 0;
                continue;
            }
            let n = remaining.min(max);
            let out = chunk.slice(replay.offset..replay.offset + n);
            replay.offset += n;
            return Some(out);
        }
        self.replay = None;
        None
    }

    /// Restarts reading from the first recorded byte. Purely local.
    pub fn rewind(&mut self) -> Result<(), ClusterError> {
        if self.is_closed() {
            return Err(ClusterError::InvalidState(format!(
                "pipe {} is closed",
                self.id
            )));
        }
        if self.recording.overflowed {
            return Err(ClusterError::InvalidState(format!(
                "cannot rewind pipe {}: more than {} bytes passed through it",
                self.id, self.recording.limit
            )));
        }
        // The leftover is already part of the recording.
        self.leftover = Bytes::new();
        self.replay = Some(Replay {
            chunk: 0,
            offset: 0,
        });
        debug!(pipe_id = self.id, bytes = self.recording.bytes, "pipe rewound");
        Ok(())
    }

    /// Marks the pipe closed without any traffic, e.g. after a failed open.
    pub(crate) fn abandon(&mut self) {
        self.state = PipeState::Closed;
    }

    /// Head: sends `End` if it was not sent yet. Follower: drains up to the `End`.
    /// Closing twice is a no-op.
    pub async fn close(&mut self) -> Result<(), ClusterError> {
        if !matches!(self.state, PipeState::Open) {
            self.finish_close();
            return Ok(());
        }
        match self.role {
            NodeRole::Head => self.end().await?,
            NodeRole::Follower => loop {
                match self.receive().await? {
                    PipeBody::End | PipeBody::Error { .. } => break,
                    _ => continue,
                }
            },
        }
        self.finish_close();
        Ok(())
    }

    fn finish_close(&mut self) {
        if !self.is_closed() {
            debug!(pipe_id = self.id, "pipe closed");
        }
        self.state = PipeState::Closed;
        self.leftover = Bytes::new();
        self.replay = None;
    }
}
