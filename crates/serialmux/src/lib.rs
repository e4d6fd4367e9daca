//! Bridge one serial link to many network clients.
//!
//! serialmux splits a single serial line into several logical byte channels
//! and exposes each channel as its own TCP or Unix-domain listener.
//!
//! # Crate Structure
//!
//! - [`frame`]: Address+length framing and fragmentation
//! - [`transport`]: Serial and loopback devices, in-flight transfer management
//! - [`mux`]: Channels, the single writer and the inbound dispatcher
//! - [`bridge`]: Network listeners relaying clients to channels

/// Re-export frame types.
pub mod frame {
    pub use serialmux_frame::*;
}

/// Re-export transport types.
pub mod transport {
    pub use serialmux_transport::*;
}

/// Re-export multiplexer types.
pub mod mux {
    pub use serialmux_mux::*;
}

/// Re-export bridge types.
pub mod bridge {
    pub use serialmux_bridge::*;
}
