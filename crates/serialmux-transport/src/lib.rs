//! Physical transport devices and in-flight transfer lifetime management.
//!
//! This is the lowest layer of serialmux. A [`Device`] exposes the
//! submit/cancel/pump primitives of the physical link; the
//! [`TransferManager`] owns the single background thread that pumps device
//! events and hands every completion back to the async reactor.

pub mod arena;
pub mod device;
pub mod error;
pub mod line;
pub mod loopback;
pub mod manager;
pub mod serial;
pub mod transfer;

pub use device::{Device, DeviceEvent};
pub use error::{Result, TransportError};
pub use line::{LineConfig, Parity, StopBits};
pub use loopback::{LoopbackDevice, LoopbackRemote};
pub use manager::{Inbound, ManagerConfig, PendingTransfer, TransferManager};
pub use serial::{
    spawn_reviver, LinkState, PortIo, PortOpener, ReviverConfig, SerialDevice, SystemPortOpener,
};
pub use transfer::{TransferId, TransferKind, TransferOutcome, TransferStatus};
