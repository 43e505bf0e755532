//! Length-prefixed JSON frame codec.
//!
//! Frames are a 4-byte big-endian length followed by a JSON body. The codec
//! is generic over the sent/received message types so the same type works on
//! both sides of a connection.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;

/// Default maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Frame codec sending `Tx` messages and receiving `Rx` messages.
#[derive(Debug)]
pub struct FrameCodec<Tx, Rx> {
    max_frame: usize,
    _marker: PhantomData<fn(Tx) -> Rx>,
}

impl<Tx, Rx> FrameCodec<Tx, Rx> {
    /// Create a codec with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame: MAX_FRAME_SIZE,
            _marker: PhantomData,
        }
    }

    /// Create a codec with a custom frame size limit.
    #[must_use]
    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            max_frame,
            _marker: PhantomData,
        }
    }
}

impl<Tx, Rx> Default for FrameCodec<Tx, Rx> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tx: Serialize, Rx> Encoder<Tx> for FrameCodec<Tx, Rx> {
    type Error = WireError;

    fn encode(&mut self, item: Tx, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = serde_json::to_vec(&item)?;
        if body.len() > self.max_frame {
            return Err(WireError::FrameTooLarge {
                size: body.len(),
                max: self.max_frame,
            });
        }
        dst.reserve(LEN_PREFIX + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

impl<Tx, Rx: DeserializeOwned> Decoder for FrameCodec<Tx, Rx> {
    type Item = Rx;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LEN_PREFIX {
            return Ok(None);
        }
        let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if len > self.max_frame {
            return Err(WireError::FrameTooLarge {
                size: len,
                max: self.max_frame,
            });
        }
        if src.len() < LEN_PREFIX + len {
            src.reserve(LEN_PREFIX + len - src.len());
            return Ok(None);
        }
        src.advance(LEN_PREFIX);
        let body = src.split_to(len);
        Ok(Some(serde_json::from_slice(&body)?))
    }
}
