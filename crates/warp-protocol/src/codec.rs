//! Channel-tagged length-delimited framing over one reliable stream.
//!
//! Each frame is `channel: u8`, `len: u32` big-endian, then `len` payload
//! bytes. The codec is pure encode/decode: a malformed frame is reported to
//! the caller and no recovery is attempted.

use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Default cap on a single frame payload.
pub const MAX_FRAME_BYTES: usize = 256 * 1024;

const HEADER_LEN: usize = 5;

/// Logical channel a frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Update,
    State,
    Data,
}

impl Channel {
    fn tag(self) -> u8 {
        match self {
            Channel::Update => 0,
            Channel::State => 1,
            Channel::Data => 2,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Channel::Update),
            1 => Some(Channel::State),
            2 => Some(Channel::Data),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: Channel,
    pub payload: Bytes,
}

pub struct FrameCodec {
    max_frame_bytes: usize,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::with_max(MAX_FRAME_BYTES)
    }

    pub fn with_max(max_frame_bytes: usize) -> Self {
        Self { max_frame_bytes }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, io::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let tag = src[0];
        let channel = Channel::from_tag(tag).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, format!("unknown channel tag {tag}"))
        })?;
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > self.max_frame_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit of {}", self.max_frame_bytes),
            ));
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }
        src.advance(HEADER_LEN);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { channel, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), io::Error> {
        if frame.payload.len() > self.max_frame_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "frame of {} bytes exceeds limit of {}",
                    frame.payload.len(),
                    self.max_frame_bytes
                ),
            ));
        }
        dst.reserve(HEADER_LEN + frame.payload.len());
        dst.put_u8(frame.channel.tag());
        dst.put_u32(frame.payload.len() as u32);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
