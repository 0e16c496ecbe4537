//! Multipart datagram codec for the routed TCP links.
//!
//! Wire format: 4-byte big-endian datagram length, then each frame as a
//! 4-byte big-endian length prefix + bytes. Frame boundaries are preserved;
//! frame contents are opaque at this layer.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::{ControlMessage, DataMessage};
use crate::ProtocolError;

/// Default datagram size limit: 16 MB.
pub const MAX_DATAGRAM_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes (datagram and per-frame).
const LENGTH_PREFIX_SIZE: usize = 4;

/// Codec for framing multipart datagrams over a byte stream.
///
/// The size guard defaults to [`MAX_DATAGRAM_SIZE`] and follows
/// `ProtocolTiming::max_datagram_bytes` when built through `with_limit`.
pub struct FrameCodec {
    max_datagram_bytes: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_limit(MAX_DATAGRAM_SIZE)
    }

    pub fn with_limit(max_datagram_bytes: usize) -> Self {
        Self { max_datagram_bytes }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<Bytes>;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least the datagram length prefix
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        // Peek at the length
        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_datagram_bytes {
            return Err(ProtocolError::MessageTooLarge {
                size: length,
                max: self.max_datagram_bytes,
            });
        }

        // Check if we have the full datagram
        let total = LENGTH_PREFIX_SIZE + length;
        if src.len() < total {
            // Reserve space for the rest
            src.reserve(total - src.len());
            return Ok(None);
        }

        // Consume the datagram length prefix
        src.advance(LENGTH_PREFIX_SIZE);
        let mut body = src.split_to(length).freeze();

        // Split the datagram into its frames
        let mut frames = Vec::new();
        while !body.is_empty() {
            if body.len() < LENGTH_PREFIX_SIZE {
                return Err(ProtocolError::MalformedFrame(
                    "truncated frame length prefix".into(),
                ));
            }
            let frame_len =
                u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
            body.advance(LENGTH_PREFIX_SIZE);
            if body.len() < frame_len {
                return Err(ProtocolError::MalformedFrame(format!(
                    "frame claims {frame_len} bytes, {} remain in datagram",
                    body.len()
                )));
            }
            frames.push(body.split_to(frame_len));
        }

        Ok(Some(frames))
    }
}

impl Encoder<Vec<Bytes>> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Vec<Bytes>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_len: usize = item
            .iter()
            .map(|frame| LENGTH_PREFIX_SIZE + frame.len())
            .sum();

        if body_len > self.max_datagram_bytes {
            return Err(ProtocolError::MessageTooLarge {
                size: body_len,
                max: self.max_datagram_bytes,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + body_len);
        dst.put_u32(body_len as u32);
        for frame in &item {
            dst.put_u32(frame.len() as u32);
            dst.extend_from_slice(frame);
        }

        Ok(())
    }
}

/// Control-plane codec: multipart framing plus envelope interpretation.
pub struct ControlCodec {
    frames: FrameCodec,
}

impl ControlCodec {
    pub fn new() -> Self {
        Self {
            frames: FrameCodec::new(),
        }
    }

    pub fn with_limit(max_datagram_bytes: usize) -> Self {
        Self {
            frames: FrameCodec::with_limit(max_datagram_bytes),
        }
    }
}

impl Default for ControlCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ControlCodec {
    type Item = ControlMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            None => Ok(None),
            Some(frames) => ControlMessage::from_frames(frames).map(Some),
        }
    }
}

impl Encoder<ControlMessage> for ControlCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.frames.encode(item.to_frames(), dst)
    }
}

/// Data-plane codec: multipart framing plus topic/header interpretation.
pub struct DataCodec {
    frames: FrameCodec,
}

impl DataCodec {
    pub fn new() -> Self {
        Self {
            frames: FrameCodec::new(),
        }
    }

    pub fn with_limit(max_datagram_bytes: usize) -> Self {
        Self {
            frames: FrameCodec::with_limit(max_datagram_bytes),
        }
    }
}

impl Default for DataCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for DataCodec {
    type Item = DataMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.frames.decode(src)? {
            None => Ok(None),
            Some(frames) => DataMessage::from_frames(frames).map(Some),
        }
    }
}

impl Encoder<DataMessage> for DataCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: DataMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.frames.encode(item.to_frames(), dst)
    }
}
