use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::transfer::{TransferId, TransferStatus};

/// A completion reported by a device while pumping events.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub id: TransferId,
    pub status: TransferStatus,
    pub actual_length: usize,
    /// Received bytes; empty for sends.
    pub data: Bytes,
}

impl DeviceEvent {
    pub fn sent(id: TransferId, status: TransferStatus, actual_length: usize) -> Self {
        Self {
            id,
            status,
            actual_length,
            data: Bytes::new(),
        }
    }

    pub fn received(id: TransferId, status: TransferStatus, data: Bytes) -> Self {
        Self {
            id,
            status,
            actual_length: data.len(),
            data,
        }
    }

    pub fn cancelled(id: TransferId) -> Self {
        Self::sent(id, TransferStatus::Cancelled, 0)
    }
}

/// The submit/cancel/pump primitives of a physical link.
///
/// `submit_*` and `cancel_all` may be called from any thread. `pump_events`
/// is only ever called from the transfer manager's background thread; it
/// blocks for at most `timeout` and returns the completions that became ready.
/// Every submitted transfer must eventually be reported exactly once, with
/// [`TransferStatus::Cancelled`] if `cancel_all` got to it first.
pub trait Device: Send + Sync + 'static {
    /// Short name used in log fields.
    fn name(&self) -> &str;

    /// Arm a receive of up to `capacity` bytes.
    fn submit_receive(&self, id: TransferId, capacity: usize) -> Result<()>;

    /// Queue `data` for transmission. The device keeps its own reference to
    /// the buffer until the transfer is reported.
    fn submit_send(&self, id: TransferId, data: Bytes) -> Result<()>;

    /// Cancel every outstanding transfer.
    fn cancel_all(&self);

    /// Wait up to `timeout` for completions.
    fn pump_events(&self, timeout: Duration) -> Result<Vec<DeviceEvent>>;
}
