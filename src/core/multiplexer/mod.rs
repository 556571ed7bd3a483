// src/core/multiplexer/mod.rs

//! The multiplexer owns the links between the head and its followers and the
//! operation sequence counter that keeps every node in lock-step.
//!
//! Every broadcast, gather round, and barrier consumes exactly one sequence number
//! on every node. Because all nodes run the same program, the numbers line up, and
//! each frame is tagged with the number of the operation it belongs to. A frame that
//! turns up where the receiving node's program does not expect it is a
//! `ProtocolDesync`, which poisons the multiplexer for the rest of the session.

mod events;
mod inbound;
mod link;

pub use events::ClusterEvent;

use crate::config::IoConfig;
use crate::core::ClusterError;
use crate::core::metrics;
use crate::core::protocol::message::{decode_message, encode_message};
use crate::core::protocol::frame::check_payload_size;
use crate::core::protocol::{Frame, FrameCodec, FrameKind};
use crate::core::role::{NodeRole, Peer};
use bytes::Bytes;
use link::Link;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// The combining operation of a `reduce`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
    /// Bitwise AND. On `0`/`1` values this is logical AND.
    And,
    /// Bitwise OR. On `0`/`1` values this is logical OR.
    Or,
}

impl ReduceOp {
    pub fn apply(self, acc: i64, value: i64) -> i64 {
        match self {
            ReduceOp::Sum => acc.wrapping_add(value),
            ReduceOp::Min => acc.min(value),
            ReduceOp::Max => acc.max(value),
            ReduceOp::And => acc & value,
            ReduceOp::Or => acc | value,
        }
    }
}

/// The multiplexer shared by a session and every pipe it opens.
pub type SharedMultiplexer = Arc<Mutex<Multiplexer>>;

struct GatherRound {
    sequence: u64,
    received: Vec<bool>,
}

pub struct Multiplexer {
    role: NodeRole,
    node_index: Option<usize>,
    /// The last sequence number consumed.
    sequence: u64,
    /// Head: one link per follower, by ordinal. Follower: the link to the head.
    links: Vec<Link>,
    events: VecDeque<ClusterEvent>,
    gather_round: Option<GatherRound>,
    poisoned: Option<ClusterError>,
    shut_down: bool,
}

impl Multiplexer {
    /// Builds the head side over already-connected follower transports, in ordinal order.
    pub fn head_from_streams<S>(streams: Vec<S>, io: &IoConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let framed = streams
            .into_iter()
            .map(|stream| Framed::new(stream, FrameCodec))
            .collect();
        Self::head_from_framed(framed, io)
    }

    /// Like `head_from_streams`, keeping any bytes a handshake already buffered.
    pub fn head_from_framed<S>(links: Vec<Framed<S, FrameCodec>>, io: &IoConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let links: Vec<Link> = links
            .into_iter()
            .enumerate()
            .map(|(index, framed)| {
                Link::spawn(
                    framed,
                    Peer::Follower(index),
                    io.queue_capacity,
                    io.reorder_window,
                )
            })
            .collect();
        metrics::LIVE_FOLLOWERS.set(links.len() as f64);
        info!("Head multiplexer ready with {} follower(s).", links.len());
        Self::new(NodeRole::Head, None, links)
    }

    /// Builds a follower side over its transport to the head.
    pub fn follower_from_stream<S>(node_index: usize, stream: S, io: &IoConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::follower_from_framed(node_index, Framed::new(stream, FrameCodec), io)
    }

    pub fn follower_from_framed<S>(
        node_index: usize,
        framed: Framed<S, FrameCodec>,
        io: &IoConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let link = Link::spawn(framed, Peer::Head, io.queue_capacity, io.reorder_window);
        info!("Follower {node_index} multiplexer ready.");
        Self::new(NodeRole::Follower, Some(node_index), vec![link])
    }

    fn new(role: NodeRole, node_index: Option<usize>, links: Vec<Link>) -> Self {
        Self {
            role,
            node_index,
            sequence: 0,
            links,
            events: VecDeque::new(),
            gather_round: None,
            poisoned: None,
            shut_down: false,
        }
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    /// The follower ordinal, or `None` on the head.
    pub fn node_index(&self) -> Option<usize> {
        self.node_index
    }

    /// The last sequence number consumed by this node.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The number of followers the head was started with. Zero on followers.
    pub fn follower_count(&self) -> usize {
        match self.role {
            NodeRole::Head => self.links.len(),
            NodeRole::Follower => 0,
        }
    }

    /// Ordinals of followers still part of the fan-out.
    pub fn live_followers(&self) -> Vec<usize> {
        if !self.role.is_head() {
            return Vec::new();
        }
        self.links
            .iter()
            .enumerate()
            .filter(|(_, link)| link.alive)
            .map(|(index, _)| index)
            .collect()
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Takes the failure events raised since the last call.
    pub fn drain_events(&mut self) -> Vec<ClusterEvent> {
        self.sweep_closed_links();
        self.events.drain(..).collect()
    }

    /// Head: sends `payload` to every live follower under a fresh sequence number.
    pub async fn broadcast(&mut self, payload: Bytes) -> Result<u64, ClusterError> {
        self.require(NodeRole::Head, "broadcast")?;
        // Before the sequence number is taken, so a refused payload leaves every node in step.
        check_payload_size(payload.len())?;
        self.sweep_closed_links();
        let sequence = self.next_sequence();

        let mut failed = Vec::new();
        for (index, link) in self.links.iter().enumerate() {
            if !link.alive {
                continue;
            }
            let frame = Frame::new(sequence, FrameKind::Broadcast, payload.clone());
            if link.send(frame).await.is_err() {
                failed.push(index);
            }
        }
        for index in failed {
            self.mark_lost(index, sequence, "outbound queue closed");
        }

        metrics::FRAMES_BROADCAST_TOTAL.inc();
        metrics::BYTES_BROADCAST_TOTAL.inc_by(payload.len() as f64);
        debug!(sequence, bytes = payload.len(), "broadcast");
        Ok(sequence)
    }

    /// Follower: waits for the broadcast belonging to the next sequence number.
    pub async fn receive_broadcast(&mut self) -> Result<Bytes, ClusterError> {
        self.require(NodeRole::Follower, "receive_broadcast")?;
        let sequence = self.next_sequence();
        let result = self
            .head_link()?
            .inbound
            .expect(sequence, FrameKind::Broadcast)
            .await
            .map(|frame| frame.payload);
        if let Ok(payload) = &result {
            debug!(sequence, bytes = payload.len(), "received broadcast");
        }
        self.observe(result)
    }

    /// Follower: contributes `payload` to the gather round of the next sequence number.
    pub async fn gather(&mut self, payload: Bytes) -> Result<(), ClusterError> {
        self.require(NodeRole::Follower, "gather")?;
        check_payload_size(payload.len())?;
        let sequence = self.next_sequence();
        let frame = Frame::new(sequence, FrameKind::Gather, payload);
        self.head_link()?.send(frame).await?;
        debug!(sequence, "sent gather contribution");
        Ok(())
    }

    /// Head: opens a gather round under a fresh sequence number.
    pub fn begin_gather(&mut self) -> Result<u64, ClusterError> {
        self.require(NodeRole::Head, "begin_gather")?;
        self.sweep_closed_links();
        let sequence = self.next_sequence();
        self.gather_round = Some(GatherRound {
            sequence,
            received: vec![false; self.links.len()],
        });
        Ok(sequence)
    }

    /// Head: waits for one follower's contribution to the open gather round.
    pub async fn receive_gather(&mut self, node_index: usize) -> Result<Bytes, ClusterError> {
        self.require(NodeRole::Head, "receive_gather")?;
        let round = self
            .gather_round
            .as_mut()
            .ok_or_else(|| ClusterError::InvalidState("no gather round is open".into()))?;
        let sequence = round.sequence;
        match round.received.get_mut(node_index) {
            None => {
                return Err(ClusterError::InvalidState(format!(
                    "no follower with index {node_index}"
                )));
            }
            Some(true) => {
                return Err(ClusterError::InvalidState(format!(
                    "follower {node_index} already contributed to gather round {sequence}"
                )));
            }
            Some(received) => *received = true,
        }

        let link = &mut self.links[node_index];
        if !link.alive {
            return Err(ClusterError::ConnectionLost {
                node: Peer::Follower(node_index),
            });
        }
        match link.inbound.expect(sequence, FrameKind::Gather).await {
            Ok(frame) => Ok(frame.payload),
            Err(e @ ClusterError::ConnectionLost { .. }) => {
                self.mark_lost(node_index, sequence, "link closed during gather");
                Err(e)
            }
            Err(e) => self.observe(Err(e)),
        }
    }

    /// Head: runs a whole gather round, one result per follower ordinal.
    /// Lost followers yield `ConnectionLost`; a desync fails the whole call.
    pub async fn gather_all(&mut self) -> Result<Vec<Result<Bytes, ClusterError>>, ClusterError> {
        self.begin_gather()?;
        let mut replies = Vec::with_capacity(self.links.len());
        for node_index in 0..self.links.len() {
            match self.receive_gather(node_index).await {
                Err(e) if e.is_fatal() => return Err(e),
                reply => replies.push(reply),
            }
        }
        Ok(replies)
    }

    /// Blocks until every live node reached this barrier.
    pub async fn barrier(&mut self) -> Result<(), ClusterError> {
        self.require(self.role, "barrier")?;
        match self.role {
            NodeRole::Head => self.head_barrier().await,
            NodeRole::Follower => self.follower_barrier().await,
        }
    }

    async fn head_barrier(&mut self) -> Result<(), ClusterError> {
        self.sweep_closed_links();
        let sequence = self.next_sequence();

        for node_index in 0..self.links.len() {
            let link = &mut self.links[node_index];
            if !link.alive {
                continue;
            }
            match link.inbound.expect(sequence, FrameKind::Barrier).await {
                Ok(_) => {}
                Err(ClusterError::ConnectionLost { .. }) => {
                    self.mark_lost(node_index, sequence, "link closed before barrier");
                }
                Err(e) => return self.observe(Err(e)),
            }
        }

        let mut failed = Vec::new();
        for (index, link) in self.links.iter().enumerate() {
            if !link.alive {
                continue;
            }
            let release = Frame::new(sequence, FrameKind::BarrierRelease, Bytes::new());
            if link.send(release).await.is_err() {
                failed.push(index);
            }
        }
        for index in failed {
            self.mark_lost(index, sequence, "outbound queue closed");
        }

        metrics::BARRIERS_TOTAL.inc();
        debug!(sequence, "barrier released");
        Ok(())
    }

    async fn follower_barrier(&mut self) -> Result<(), ClusterError> {
        let sequence = self.next_sequence();
        let link = self.head_link()?;
        link.send(Frame::new(sequence, FrameKind::Barrier, Bytes::new()))
            .await?;
        let result = link
            .inbound
            .expect(sequence, FrameKind::BarrierRelease)
            .await
            .map(|_| ());
        if result.is_ok() {
            metrics::BARRIERS_TOTAL.inc();
            debug!(sequence, "barrier released");
        }
        self.observe(result)
    }

    /// All-reduce: every node contributes `value` and every node returns the
    /// combined result. Lost followers are left out. Consumes two sequence numbers.
    pub async fn reduce(&mut self, value: i64, op: ReduceOp) -> Result<i64, ClusterError> {
        match self.role {
            NodeRole::Head => {
                let replies = self.gather_all().await?;
                let mut acc = value;
                for payload in replies.into_iter().flatten() {
                    let contribution: i64 = self.observe(decode_message(&payload))?;
                    acc = op.apply(acc, contribution);
                }
                self.broadcast(encode_message(&acc)?).await?;
                Ok(acc)
            }
            NodeRole::Follower => {
                self.gather(encode_message(&value)?).await?;
                let payload = self.receive_broadcast().await?;
                self.observe(decode_message(&payload))
            }
        }
    }

    /// Flushes queued frames and closes every link. Later operations fail.
    pub async fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        for link in self.links.drain(..) {
            link.shutdown().await;
        }
        if self.role.is_head() {
            metrics::LIVE_FOLLOWERS.set(0.0);
        }
        info!(sequence = self.sequence, "Multiplexer shut down.");
    }

    /// Poisons the multiplexer with a desync detected above the frame layer.
    pub(crate) fn poison(&mut self, reason: String) -> ClusterError {
        let e = ClusterError::ProtocolDesync(reason);
        let _ = self.observe::<()>(Err(e.clone()));
        e
    }

    fn require(&self, role: NodeRole, operation: &str) -> Result<(), ClusterError> {
        if let Some(e) = &self.poisoned {
            return Err(e.clone());
        }
        if self.shut_down {
            return Err(ClusterError::InvalidState(
                "the multiplexer has been shut down".into(),
            ));
        }
        if self.role != role {
            return Err(ClusterError::InvalidState(format!(
                "{operation} is only available on the {role}"
            )));
        }
        Ok(())
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn head_link(&mut self) -> Result<&mut Link, ClusterError> {
        self.links
            .first_mut()
            .ok_or_else(|| ClusterError::Internal("follower has no link to the head".into()))
    }

    /// Poisons the multiplexer on fatal errors and passes the result through.
    fn observe<T>(&mut self, result: Result<T, ClusterError>) -> Result<T, ClusterError> {
        if let Err(e) = &result
            && e.is_fatal()
            && self.poisoned.is_none()
        {
            error!(sequence = self.sequence, "Multiplexer poisoned: {e}");
            metrics::PROTOCOL_DESYNCS_TOTAL.inc();
            self.poisoned = Some(e.clone());
        }
        result
    }

    /// Reports followers whose writer task has already stopped.
    fn sweep_closed_links(&mut self) {
        if !self.role.is_head() {
            return;
        }
        let closed: Vec<usize> = self
            .links
            .iter()
            .enumerate()
            .filter(|(_, link)| link.alive && link.is_closed())
            .map(|(index, _)| index)
            .collect();
        for index in closed {
            self.mark_lost(index, self.sequence, "link closed");
        }
    }

    fn mark_lost(&mut self, index: usize, sequence: u64, reason: &str) {
        let Some(link) = self.links.get_mut(index) else {
            return;
        };
        if !link.alive {
            return;
        }
        link.alive = false;
        warn!(sequence, "Follower {index} lost: {reason}");
        metrics::FOLLOWERS_LOST_TOTAL.inc();
        metrics::LIVE_FOLLOWERS.dec();
        self.events.push_back(ClusterEvent::FollowerLost {
            node: index,
            sequence,
            reason: reason.to_string(),
        });
    }
}
