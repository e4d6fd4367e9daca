use std::fmt;

use bytes::Bytes;

/// Handle naming one in-flight transfer.
///
/// The generation makes a handle from a released slot stale instead of
/// aliasing the transfer that reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl TransferId {
    /// Build a handle from raw parts.
    pub fn from_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// Direction of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Send,
    Receive,
}

/// Final status of a transfer, mirroring bulk-transfer driver statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
}

impl TransferStatus {
    pub fn is_success(self) -> bool {
        self == TransferStatus::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferStatus::Completed => "completed",
            TransferStatus::Error => "error",
            TransferStatus::TimedOut => "timed_out",
            TransferStatus::Cancelled => "cancelled",
            TransferStatus::Stall => "stall",
            TransferStatus::NoDevice => "no_device",
            TransferStatus::Overflow => "overflow",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a completed transfer reports back to its submitter.
#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub status: TransferStatus,
    /// Bytes actually moved by the device.
    pub actual_length: usize,
    /// Received bytes (empty for sends).
    pub data: Bytes,
}

impl TransferOutcome {
    pub fn cancelled() -> Self {
        Self {
            status: TransferStatus::Cancelled,
            actual_length: 0,
            data: Bytes::new(),
        }
    }
}
