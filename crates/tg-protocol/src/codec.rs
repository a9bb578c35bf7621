//! Tokio codec for multipart messages
//!
//! Wire format:
//! - frame_count: 4 bytes (u32, big-endian)
//! - per frame: length (u32, big-endian) followed by the frame bytes

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::multipart::Multipart;

/// Size of the frame-count prefix
const COUNT_SIZE: usize = 4;

/// Size of each frame length prefix
const LENGTH_SIZE: usize = 4;

/// Maximum number of frames in one message
pub const MAX_FRAMES: usize = 64;

/// Maximum size of a single frame (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Codec for encoding/decoding multipart messages
#[derive(Debug, Default)]
pub struct MultipartCodec;

impl MultipartCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self
    }
}

fn read_u32(src: &BytesMut, offset: usize) -> usize {
    u32::from_be_bytes([src[offset], src[offset + 1], src[offset + 2], src[offset + 3]]) as usize
}

impl Decoder for MultipartCodec {
    type Item = Multipart;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < COUNT_SIZE {
            return Ok(None);
        }

        let count = read_u32(src, 0);
        if count > MAX_FRAMES {
            return Err(ProtocolError::TooManyFrames {
                count,
                max: MAX_FRAMES,
            });
        }

        // Walk the length prefixes without consuming until the whole message is buffered
        let mut offset = COUNT_SIZE;
        let mut lengths = Vec::with_capacity(count);
        for _ in 0..count {
            if src.len() < offset + LENGTH_SIZE {
                return Ok(None);
            }
            let len = read_u32(src, offset);
            if len > MAX_FRAME_SIZE {
                return Err(ProtocolError::FrameTooLarge {
                    size: len,
                    max: MAX_FRAME_SIZE,
                });
            }
            offset += LENGTH_SIZE;
            if src.len() < offset + len {
                src.reserve(offset + len - src.len());
                return Ok(None);
            }
            offset += len;
            lengths.push(len);
        }

        src.advance(COUNT_SIZE);
        let mut frames = Vec::with_capacity(count);
        for len in lengths {
            src.advance(LENGTH_SIZE);
            frames.push(src.split_to(len).freeze());
        }

        Ok(Some(Multipart::from_frames(frames)))
    }
}

impl Encoder<Multipart> for MultipartCodec {
    type Error = ProtocolError;

    fn encode(&mut self, message: Multipart, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if message.len() > MAX_FRAMES {
            return Err(ProtocolError::TooManyFrames {
                count: message.len(),
                max: MAX_FRAMES,
            });
        }

        if let Some(frame) = message.frames().iter().find(|f| f.len() > MAX_FRAME_SIZE) {
            return Err(ProtocolError::FrameTooLarge {
                size: frame.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(COUNT_SIZE + message.len() * LENGTH_SIZE + message.byte_len());
        dst.put_u32(message.len() as u32);
        for frame in message {
            dst.put_u32(frame.len() as u32);
            dst.extend_from_slice(&frame);
        }

        Ok(())
    }
}
