use serialmux_transport::TransferStatus;

/// Errors that can occur in multiplexer operations.
#[derive(Debug, thiserror::Error)]
pub enum MuxError {
    /// The device reported a failed completion. `len` is the length of the
    /// chunk that failed, not the total sent so far.
    #[error("send failed with status {status} ({len} bytes)")]
    SendFailed { status: TransferStatus, len: usize },

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] serialmux_transport::TransportError),

    /// The single-writer queue has stopped.
    #[error("multiplexer writer closed")]
    Closed,

    /// No channel exists for this address under the current policy.
    #[error("no channel at address {0}")]
    NoSuchChannel(u8),
}

pub type Result<T> = std::result::Result<T, MuxError>;
