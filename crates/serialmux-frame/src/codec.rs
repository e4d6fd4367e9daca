use bytes::{BufMut, Bytes, BytesMut};

use crate::address::Address;
use crate::error::{FrameError, Result};

/// Frame header: address (1) + length (1) = 2 bytes.
pub const HEADER_SIZE: usize = 2;

/// Maximum payload per frame. A full frame fits a 64-byte USB packet.
pub const MAX_PAYLOAD: usize = 62;

/// One frame of the multiplexing protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The channel this payload belongs to.
    pub address: Address,
    /// The frame payload (at most [`MAX_PAYLOAD`] bytes when encoded).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(address: Address, payload: impl Into<Bytes>) -> Self {
        Self {
            address,
            payload: payload.into(),
        }
    }

    /// The total wire size of this frame (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Encode a single frame into the wire format.
///
/// Wire format:
/// ```text
/// ┌──────────┬──────────┬──────────────────┐
/// │ Addr (1B)│ Len (1B) │ Payload          │
/// │ 1..=6    │ 0..=62   │ (Len bytes)      │
/// └──────────┴──────────┴──────────────────┘
/// ```
pub fn encode_frame(address: Address, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::Oversized {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }
    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_u8(address.get());
    dst.put_u8(payload.len() as u8);
    dst.put_slice(payload);
    Ok(())
}

/// Split a message into wire-encoded frames of at most [`MAX_PAYLOAD`] bytes.
///
/// An empty message yields no frames.
pub fn fragment(address: Address, payload: Bytes) -> Fragments {
    Fragments {
        address,
        remaining: payload,
    }
}

/// Iterator over the wire-encoded frames of one message.
#[derive(Debug, Clone)]
pub struct Fragments {
    address: Address,
    remaining: Bytes,
}

impl Fragments {
    /// Payload bytes not yet emitted.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

impl Iterator for Fragments {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.remaining.is_empty() {
            return None;
        }
        let chunk = self
            .remaining
            .split_to(MAX_PAYLOAD.min(self.remaining.len()));
        let mut wire = BytesMut::with_capacity(HEADER_SIZE + chunk.len());
        wire.put_u8(self.address.get());
        wire.put_u8(chunk.len() as u8);
        wire.put_slice(&chunk);
        Some(wire.freeze())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining.len().div_ceil(MAX_PAYLOAD);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Fragments {}

/// Decode every frame in one buffer read from the physical link.
///
/// The iterator yields frames in order. On the first malformed header it
/// yields the error and stops; the rest of the buffer is discarded. Nothing is
/// carried over between buffers, so a header split across two reads is
/// reported as [`FrameError::ShortHeader`] or [`FrameError::Truncated`]. Use
/// [`crate::FrameCodec`] when reassembly is wanted.
pub fn decode_frames(src: &Bytes) -> FrameIter<'_> {
    FrameIter {
        src,
        pos: 0,
        failed: false,
    }
}

/// Iterator returned by [`decode_frames`].
#[derive(Debug)]
pub struct FrameIter<'a> {
    src: &'a Bytes,
    pos: usize,
    failed: bool,
}

impl FrameIter<'_> {
    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.src.len() - self.pos
    }
}

impl Iterator for FrameIter<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.src.len() {
            return None;
        }

        let rest = &self.src[self.pos..];
        let result = parse_header(rest).map(|(address, len)| {
            let start = self.pos + HEADER_SIZE;
            let payload = self.src.slice(start..start + len);
            self.pos = start + len;
            Frame { address, payload }
        });

        if result.is_err() {
            self.failed = true;
            self.pos = self.src.len();
        }
        Some(result)
    }
}

impl std::iter::FusedIterator for FrameIter<'_> {}

/// Validate the header at the start of `rest` against the bytes available.
fn parse_header(rest: &[u8]) -> Result<(Address, usize)> {
    if rest.len() < HEADER_SIZE {
        return Err(FrameError::ShortHeader {
            remaining: rest.len(),
        });
    }
    let address = Address::try_from(rest[0])?;
    let len = rest[1] as usize;
    if HEADER_SIZE + len > rest.len() {
        return Err(FrameError::Truncated {
            declared: len,
            available: rest.len() - HEADER_SIZE,
        });
    }
    Ok((address, len))
}
