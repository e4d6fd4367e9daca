/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Fewer than two bytes were left where a header was expected.
    #[error("short frame header ({remaining} byte(s) left)")]
    ShortHeader { remaining: usize },

    /// The header names an address outside `1..=CHANNEL_COUNT`.
    #[error("invalid channel address {addr}")]
    InvalidAddress { addr: u8 },

    /// The header declares more payload than the buffer holds.
    #[error("truncated frame (declared {declared} bytes, {available} available)")]
    Truncated { declared: usize, available: usize },

    /// The payload exceeds the per-frame maximum.
    #[error("frame payload too large ({len} bytes, max {max})")]
    Oversized { len: usize, max: usize },

    /// The stream under a `FramedRead`/`FramedWrite` failed. Required by the
    /// `tokio_util::codec` error bound.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
