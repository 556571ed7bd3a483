// src/core/multiplexer/inbound.rs

//! The receiving side of a link: hands frames to the application strictly in
//! sequence order, holding early arrivals in a bounded reorder window.

use crate::core::ClusterError;
use crate::core::metrics;
use crate::core::protocol::{Frame, FrameKind};
use crate::core::role::Peer;
use std::collections::BTreeMap;
use tokio::sync::mpsc;

pub(crate) struct Inbound {
    peer: Peer,
    rx: mpsc::Receiver<Result<Frame, ClusterError>>,
    /// Frames that arrived ahead of the sequence number being waited for.
    pending: BTreeMap<u64, Frame>,
    window: usize,
}

impl Inbound {
    pub(crate) fn new(
        peer: Peer,
        rx: mpsc::Receiver<Result<Frame, ClusterError>>,
        window: usize,
    ) -> Self {
        Self {
            peer,
            rx,
            pending: BTreeMap::new(),
            window,
        }
    }

    /// Waits for the frame tagged `sequence` and checks that it is of `kind`.
    pub(crate) async fn expect(
        &mut self,
        sequence: u64,
        kind: FrameKind,
    ) -> Result<Frame, ClusterError> {
        loop {
            if let Some(frame) = self.pending.remove(&sequence) {
                return self.accept(frame, kind);
            }
            let frame = match self.rx.recv().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return Err(e),
                None => return Err(ClusterError::ConnectionLost { node: self.peer }),
            };
            if frame.sequence == sequence {
                return self.accept(frame, kind);
            }
            self.stash(frame, sequence)?;
        }
    }

    fn accept(&self, frame: Frame, kind: FrameKind) -> Result<Frame, ClusterError> {
        if frame.kind != kind {
            return Err(ClusterError::ProtocolDesync(format!(
                "expected a {kind:?} frame with sequence {} from {}, got {:?}",
                frame.sequence, self.peer, frame.kind
            )));
        }
        metrics::FRAMES_RECEIVED_TOTAL.inc();
        Ok(frame)
    }

    fn stash(&mut self, frame: Frame, expected: u64) -> Result<(), ClusterError> {
        if frame.sequence < expected {
            return Err(ClusterError::ProtocolDesync(format!(
                "stale {:?} frame with sequence {} from {} while waiting for {expected}",
                frame.kind, frame.sequence, self.peer
            )));
        }
        if self.pending.contains_key(&frame.sequence) {
            return Err(ClusterError::ProtocolDesync(format!(
                "duplicate frame with sequence {} from {}",
                frame.sequence, self.peer
            )));
        }
        self.pending.insert(frame.sequence, frame);
        if self.pending.len() > self.window {
            return Err(ClusterError::ProtocolDesync(format!(
                "reorder window of {} frames from {} exceeded while waiting for {expected}",
                self.window, self.peer
            )));
        }
        Ok(())
    }
}
