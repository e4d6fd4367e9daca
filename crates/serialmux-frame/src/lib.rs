//! Address+length framing for multiplexing logical byte channels over one
//! serial link.
//!
//! Every frame on the wire is:
//! - a 1-byte channel address (`1..=CHANNEL_COUNT`)
//! - a 1-byte payload length (`0..=MAX_PAYLOAD`)
//! - the payload itself
//!
//! There is no checksum and no resynchronization marker. A message longer than
//! [`MAX_PAYLOAD`] is carried as consecutive frames sharing one address.

pub mod address;
pub mod codec;
pub mod error;
pub mod format;
pub mod stream;

pub use address::{Address, CHANNEL_COUNT};
pub use codec::{
    decode_frames, encode_frame, fragment, Frame, FrameIter, Fragments, HEADER_SIZE, MAX_PAYLOAD,
};
pub use error::{FrameError, Result};
pub use format::format_bytes;
pub use stream::FrameCodec;
