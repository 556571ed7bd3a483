// src/core/multiplexer/link.rs

//! One connection to a peer, driven by a dedicated reader task and writer task
//! that exchange frames with the application through bounded queues.

use super::inbound::Inbound;
use crate::core::ClusterError;
use crate::core::protocol::{Frame, FrameCodec};
use crate::core::role::Peer;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

/// Upper bound on how long shutdown waits for queued frames to reach the peer.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct Link {
    peer: Peer,
    outbound: mpsc::Sender<Frame>,
    pub(crate) inbound: Inbound,
    pub(crate) alive: bool,
    writer: JoinHandle<()>,
    // Dropping it stops the reader task.
    _stop_reader: broadcast::Sender<()>,
}

impl Link {
    pub(crate) fn spawn<S>(
        framed: Framed<S, FrameCodec>,
        peer: Peer,
        queue_capacity: usize,
        reorder_window: usize,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, mut stream) = framed.split();
        let (out_tx, out_rx) = mpsc::channel::<Frame>(queue_capacity);
        let (in_tx, in_rx) = mpsc::channel::<Result<Frame, ClusterError>>(queue_capacity);
        // Signalled by whichever task first sees the transport fail.
        let (failed_tx, _) = broadcast::channel::<()>(1);
        let (stop_tx, mut stop_rx) = broadcast::channel::<()>(1);
        let mut reader_failed_rx = failed_tx.subscribe();
        let writer_failed_rx = failed_tx.subscribe();

        let writer = tokio::spawn(run_writer(
            sink,
            out_rx,
            peer,
            failed_tx.clone(),
            writer_failed_rx,
        ));

        tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = reader_failed_rx.recv() => break,
                    _ = stop_rx.recv() => break,
                    next = stream.next() => next,
                };
                match next {
                    Some(Ok(frame)) => {
                        if in_tx.send(Ok(frame)).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(ClusterError::Io(e))) => {
                        debug!("Read from {peer} failed: {e}");
                        let _ = failed_tx.send(());
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("Undecodable frame from {peer}: {e}");
                        let _ = in_tx
                            .send(Err(ClusterError::ProtocolDesync(format!(
                                "undecodable frame from {peer}: {e}"
                            ))))
                            .await;
                        let _ = failed_tx.send(());
                        break;
                    }
                    None => {
                        debug!("{peer} closed the link.");
                        let _ = failed_tx.send(());
                        break;
                    }
                }
            }
        });

        Self {
            peer,
            outbound: out_tx,
            inbound: Inbound::new(peer, in_rx, reorder_window),
            alive: true,
            writer,
            _stop_reader: stop_tx,
        }
    }

    /// Queues a frame for the writer task. Waits only while the queue is full.
    pub(crate) async fn send(&self, frame: Frame) -> Result<(), ClusterError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| ClusterError::ConnectionLost { node: self.peer })
    }

    /// True once the writer task has stopped, i.e. the transport is gone.
    pub(crate) fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Closes the outbound queue and waits for the writer to flush what is queued.
    pub(crate) async fn shutdown(self) {
        let Link {
            peer,
            outbound,
            writer,
            ..
        } = self;
        drop(outbound);
        if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, writer)
            .await
            .is_err()
        {
            warn!("Timed out flushing frames to {peer} during shutdown.");
        }
    }
}

async fn run_writer<S>(
    mut sink: SplitSink<Framed<S, FrameCodec>, Frame>,
    mut out_rx: mpsc::Receiver<Frame>,
    peer: Peer,
    failed_tx: broadcast::Sender<()>,
    mut failed_rx: broadcast::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let next = tokio::select! {
            _ = failed_rx.recv() => break,
            next = out_rx.recv() => next,
        };
        let Some(frame) = next else {
            // Every sender is gone and the queue is drained.
            if let Err(e) = sink.close().await {
                debug!("Closing link to {peer} failed: {e}");
            }
            break;
        };
        if let Err(e) = write_batch(&mut sink, frame, &mut out_rx).await {
            warn!("Write to {peer} failed: {e}");
            let _ = failed_tx.send(());
            break;
        }
    }
}

/// Feeds `first` plus everything already queued, then flushes once.
async fn write_batch<S>(
    sink: &mut SplitSink<Framed<S, FrameCodec>, Frame>,
    first: Frame,
    out_rx: &mut mpsc::Receiver<Frame>,
) -> Result<(), ClusterError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sink.feed(first).await?;
    while let Ok(frame) = out_rx.try_recv() {
        sink.feed(frame).await?;
    }
    sink.flush().await
}
