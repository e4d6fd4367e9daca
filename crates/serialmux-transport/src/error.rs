use std::path::PathBuf;

/// Errors that can occur in physical transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to open the physical port.
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The device refused a transfer submission.
    #[error("transfer submission failed: {0}")]
    Submit(String),

    /// Too many transfers are already in flight.
    #[error("too many transfers in flight (max {max})")]
    ArenaFull { max: usize },

    /// Failed to start the background I/O thread.
    #[error("failed to spawn io thread: {0}")]
    Spawn(std::io::Error),

    /// The transfer manager has been shut down.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
