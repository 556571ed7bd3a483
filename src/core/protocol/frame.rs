// src/core/protocol/frame.rs

//! Implements the wire frame exchanged between the head and its followers and the
//! corresponding `Encoder` and `Decoder` for network communication.
//!
//! Layout (big-endian): `sequence: u64 | kind: u8 | length: u32 | payload`.

use crate::core::ClusterError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 8 + 1 + 4;

// Protocol-level limit to keep a corrupt length field from allocating unbounded memory.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// The operation a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Follower → head, first frame on a new link.
    Hello = 1,
    /// Head → follower, handshake acknowledgement.
    Welcome = 2,
    /// Head → follower, one broadcast operation.
    Broadcast = 3,
    /// Follower → head, one gather contribution.
    Gather = 4,
    /// Follower → head, arrival at a barrier.
    Barrier = 5,
    /// Head → follower, everyone reached the barrier.
    BarrierRelease = 6,
}

impl TryFrom<u8> for FrameKind {
    type Error = ClusterError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FrameKind::Hello),
            2 => Ok(FrameKind::Welcome),
            3 => Ok(FrameKind::Broadcast),
            4 => Ok(FrameKind::Gather),
            5 => Ok(FrameKind::Barrier),
            6 => Ok(FrameKind::BarrierRelease),
            other => Err(ClusterError::Codec(format!("unknown frame kind {other}"))),
        }
    }
}

/// A single tagged frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub kind: FrameKind,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(sequence: u64, kind: FrameKind, payload: Bytes) -> Self {
        Self {
            sequence,
            kind,
            payload,
        }
    }

    /// Encodes the frame into a standalone buffer.
    pub fn encode_to_vec(&self) -> Result<Vec<u8>, ClusterError> {
        let mut buf = BytesMut::new();
        FrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }
}

/// Rejects a payload the codec would refuse to encode.
pub fn check_payload_size(len: usize) -> Result<(), ClusterError> {
    if len > MAX_PAYLOAD_SIZE {
        return Err(ClusterError::Codec(format!(
            "payload of {len} bytes exceeds the {MAX_PAYLOAD_SIZE} byte limit"
        )));
    }
    Ok(())
}

/// A `tokio_util::codec` implementation for encoding and decoding `Frame`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Encoder<Frame> for FrameCodec {
    type Error = ClusterError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.payload.len();
        check_payload_size(len)?;
        dst.reserve(HEADER_LEN + len);
        dst.put_u64(item.sequence);
        dst.put_u8(item.kind as u8);
        dst.put_u32(len as u32);
        dst.extend_from_slice(&item.payload);
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ClusterError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match parse_header(&src[..]) {
            Ok((sequence, kind, len)) => {
                src.advance(HEADER_LEN);
                let payload = src.split_to(len).freeze();
                Ok(Some(Frame {
                    sequence,
                    kind,
                    payload,
                }))
            }
            // Not enough bytes for the header or the payload yet.
            Err(ClusterError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Validates the header and checks that the whole frame is buffered.
fn parse_header(mut bytes: &[u8]) -> Result<(u64, FrameKind, usize), ClusterError> {
    if bytes.len() < HEADER_LEN {
        return Err(ClusterError::IncompleteData);
    }
    let sequence = bytes.get_u64();
    let kind = FrameKind::try_from(bytes.get_u8())?;
    let len = bytes.get_u32() as usize;
    if len > MAX_PAYLOAD_SIZE {
        return Err(ClusterError::Codec(format!(
            "declared payload of {len} bytes exceeds the {MAX_PAYLOAD_SIZE} byte limit"
        )));
    }
    if bytes.len() < len {
        return Err(ClusterError::IncompleteData);
    }
    Ok((sequence, kind, len))
}
