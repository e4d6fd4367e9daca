use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::address::Address;
use crate::codec::{fragment, Frame, HEADER_SIZE, MAX_PAYLOAD};
use crate::error::FrameError;

/// Reassembling frame codec for use with `tokio_util::codec`.
///
/// Unlike [`crate::decode_frames`], the decoder keeps an incomplete header or
/// payload buffered until the next read completes it. An invalid address or an
/// oversized length clears the buffer, since the stream has no marker to
/// resynchronize on.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let raw = src[0];
        let Some(address) = Address::new(raw) else {
            tracing::debug!(addr = raw, dropped = src.len(), "discarding buffered bytes");
            src.clear();
            return Err(FrameError::InvalidAddress { addr: raw });
        };

        let len = src[1] as usize;
        if len > MAX_PAYLOAD {
            tracing::debug!(%address, len, dropped = src.len(), "discarding buffered bytes");
            src.clear();
            return Err(FrameError::Oversized {
                len,
                max: MAX_PAYLOAD,
            });
        }

        if src.len() < HEADER_SIZE + len {
            src.reserve(HEADER_SIZE + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(len).freeze();
        Ok(Some(Frame { address, payload }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    /// Writes the whole message, split into as many frames as needed.
    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let fragments = fragment(item.address, item.payload);
        dst.reserve(fragments.remaining() + fragments.len() * HEADER_SIZE);
        for wire in fragments {
            dst.put_slice(&wire);
        }
        Ok(())
    }
}
