//! Logical channels over one shared physical link.
//!
//! Sends from every [`Channel`] go through a single writer task, so the link
//! has exactly one writer. Bytes read from the link are routed back to
//! channels by the [`Dispatcher`], either verbatim to one channel
//! ([`Policy::Raw`]) or by frame address ([`Policy::Framed`]).

pub mod channel;
pub mod dispatcher;
pub mod error;
pub mod mux;
pub mod policy;
pub mod writer;

pub use channel::{Channel, Subscription};
pub use dispatcher::{DispatchStats, Dispatcher, DispatcherConfig};
pub use error::{MuxError, Result};
pub use mux::Multiplexer;
pub use policy::Policy;
pub use writer::{spawn_writer, ChannelSender, WriteRequest};
