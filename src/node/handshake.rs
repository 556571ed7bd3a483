// src/node/handshake.rs

//! Link establishment. Each follower opens one connection to the head and
//! announces its ordinal with a `Hello` frame; the head answers with `Welcome`.
//! Handshake frames carry sequence number 0, which no operation ever uses.

use super::stream::LinkStream;
use crate::core::{ClusterError, Peer};
use crate::core::protocol::message::{
    Hello, PROTOCOL_VERSION, Welcome, decode_message, encode_message,
};
use crate::core::protocol::{Frame, FrameCodec, FrameKind};
use futures::{SinkExt, StreamExt};
use rand::Rng;
use std::io;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

// How long one connection may take to complete TLS and the Hello/Welcome exchange.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
// The initial delay before the first reconnection attempt.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(200);
// The maximum delay for the exponential backoff reconnection strategy.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(5);

pub type LinkFramed = Framed<LinkStream, FrameCodec>;

/// Head: accepts connections until every follower ordinal `0..followers` has
/// completed the handshake. Returns the links in ordinal order.
pub async fn accept_followers(
    listener: &TcpListener,
    followers: usize,
    acceptor: Option<TlsAcceptor>,
    timeout: Duration,
) -> Result<Vec<LinkFramed>, ClusterError> {
    let deadline = Instant::now() + timeout;
    let mut slots: Vec<Option<LinkFramed>> = (0..followers).map(|_| None).collect();
    let mut admitted = 0;

    while admitted < followers {
        let (socket, addr) = match tokio::time::timeout_at(deadline, listener.accept()).await {
            Ok(accepted) => accepted?,
            Err(_) => {
                let missing: Vec<usize> = slots
                    .iter()
                    .enumerate()
                    .filter(|(_, slot)| slot.is_none())
                    .map(|(index, _)| index)
                    .collect();
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("followers {missing:?} did not connect within {timeout:?}"),
                )
                .into());
            }
        };
        debug!("Accepted link connection from {addr}.");

        let handshake = admit(socket, acceptor.as_ref(), &slots);
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
            Ok(Ok((node_index, framed))) => {
                info!("Follower {node_index} joined from {addr}.");
                slots[node_index] = Some(framed);
                admitted += 1;
            }
            Ok(Err(e)) => warn!("Rejected link from {addr}: {e}"),
            Err(_) => warn!("Rejected link from {addr}: handshake timed out."),
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

async fn admit(
    socket: TcpStream,
    acceptor: Option<&TlsAcceptor>,
    slots: &[Option<LinkFramed>],
) -> Result<(usize, LinkFramed), ClusterError> {
    socket.set_nodelay(true)?;
    let stream = match acceptor {
        Some(acceptor) => LinkStream::TlsServer(Box::new(acceptor.accept(socket).await?)),
        None => LinkStream::Tcp(socket),
    };
    let mut framed = Framed::new(stream, FrameCodec);

    let frame = next_handshake_frame(&mut framed, FrameKind::Hello).await?;
    let hello: Hello = decode_message(&frame.payload)?;
    if hello.protocol_version != PROTOCOL_VERSION {
        return Err(ClusterError::InvalidState(format!(
            "protocol version {} does not match {PROTOCOL_VERSION}",
            hello.protocol_version
        )));
    }
    let node_index = hello.node_index as usize;
    match slots.get(node_index) {
        None => {
            return Err(ClusterError::InvalidState(format!(
                "node index {node_index} is out of range for {} follower(s)",
                slots.len()
            )));
        }
        Some(Some(_)) => {
            return Err(ClusterError::InvalidState(format!(
                "node index {node_index} is already taken"
            )));
        }
        Some(None) => {}
    }

    let welcome = Welcome {
        protocol_version: PROTOCOL_VERSION,
        followers: slots.len() as u32,
    };
    framed
        .send(Frame::new(0, FrameKind::Welcome, encode_message(&welcome)?))
        .await?;
    Ok((node_index, framed))
}

/// Follower: connects to the head with exponential backoff and jitter until the
/// handshake succeeds or `timeout` elapses.
pub async fn connect_to_head(
    head_address: &str,
    node_index: usize,
    tls: Option<(TlsConnector, ServerName<'static>)>,
    timeout: Duration,
) -> Result<LinkFramed, ClusterError> {
    let deadline = Instant::now() + timeout;
    let mut current_delay = INITIAL_RECONNECT_DELAY;

    loop {
        info!("Attempting to connect to head at {head_address}");
        let attempt = connect_once(head_address, node_index, tls.as_ref());
        let error = match tokio::time::timeout(HANDSHAKE_TIMEOUT, attempt).await {
            Ok(Ok(framed)) => return Ok(framed),
            Ok(Err(e)) => e,
            Err(_) => io::Error::new(io::ErrorKind::TimedOut, "handshake timed out").into(),
        };

        // Apply exponential backoff with jitter so restarted groups do not stampede the head.
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..100));
        let wait_time = current_delay + jitter;
        if Instant::now() + wait_time >= deadline {
            warn!("Giving up on head at {head_address}: {error}");
            return Err(ClusterError::ConnectionLost { node: Peer::Head });
        }
        warn!("Connecting to head failed: {error}. Retrying in {wait_time:?}");
        tokio::time::sleep(wait_time).await;
        current_delay = (current_delay * 2).min(MAX_RECONNECT_DELAY);
    }
}

async fn connect_once(
    head_address: &str,
    node_index: usize,
    tls: Option<&(TlsConnector, ServerName<'static>)>,
) -> Result<LinkFramed, ClusterError> {
    let socket = TcpStream::connect(head_address).await?;
    socket.set_nodelay(true)?;
    let stream = match tls {
        Some((connector, name)) => {
            info!("Establishing TLS connection with head at {head_address}");
            LinkStream::TlsClient(Box::new(connector.connect(name.clone(), socket).await?))
        }
        None => LinkStream::Tcp(socket),
    };
    let mut framed = Framed::new(stream, FrameCodec);

    let hello = Hello {
        protocol_version: PROTOCOL_VERSION,
        node_index: node_index as u32,
    };
    framed
        .send(Frame::new(0, FrameKind::Hello, encode_message(&hello)?))
        .await?;

    let frame = next_handshake_frame(&mut framed, FrameKind::Welcome).await?;
    let welcome: Welcome = decode_message(&frame.payload)?;
    if welcome.protocol_version != PROTOCOL_VERSION {
        return Err(ClusterError::InvalidState(format!(
            "head speaks protocol version {}, expected {PROTOCOL_VERSION}",
            welcome.protocol_version
        )));
    }
    info!(
        "Joined the group as follower {node_index} of {}.",
        welcome.followers
    );
    Ok(framed)
}

async fn next_handshake_frame(
    framed: &mut LinkFramed,
    kind: FrameKind,
) -> Result<Frame, ClusterError> {
    let frame = framed.next().await.ok_or_else(|| {
        ClusterError::from(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed during handshake",
        ))
    })??;
    if frame.kind != kind || frame.sequence != 0 {
        return Err(ClusterError::ProtocolDesync(format!(
            "expected a {kind:?} handshake frame, got {:?} with sequence {}",
            frame.kind, frame.sequence
        )));
    }
    Ok(frame)
}
