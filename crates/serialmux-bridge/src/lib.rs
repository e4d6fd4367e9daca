//! Network side of serialmux.
//!
//! A [`BridgeListener`] accepts TCP or Unix-domain clients for one channel and
//! relays raw bytes in both directions. The newest client on a channel wins:
//! accepting a connection replaces the channel's subscriber, which tears the
//! previous connection down.

pub mod addr;
pub mod connection;
pub mod error;
pub mod listener;
#[cfg(unix)]
pub mod uds;

pub use addr::ListenAddr;
pub use connection::{relay, BridgeConfig, ConnectionStats};
pub use error::{BridgeError, Result};
pub use listener::{run_all, BridgeListener};
#[cfg(unix)]
pub use uds::UnixSocketListener;
