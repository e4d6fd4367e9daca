//! Routing of bytes received from the physical link.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use serialmux_frame::{decode_frames, format_bytes, Frame, FrameCodec};
use serialmux_transport::Inbound;
use tokio_util::codec::Decoder;
use tracing::{info, trace, warn, Level};

use crate::channel::Channel;
use crate::policy::Policy;

/// Dispatcher settings.
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    pub policy: Policy,
    /// Carry incomplete frames across reads instead of reporting them.
    pub reassemble: bool,
}

/// Counters kept by the dispatcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Buffers received from the link.
    pub reads: u64,
    /// Frames (or raw chunks) delivered to a subscriber.
    pub delivered: u64,
    /// Payload bytes delivered.
    pub bytes: u64,
    /// Frames (or raw chunks) with nobody to take them.
    pub unclaimed: u64,
    /// Framing errors.
    pub errors: u64,
}

/// Routes inbound link data to channels.
pub struct Dispatcher {
    channels: Vec<Arc<Channel>>,
    config: DispatcherConfig,
    codec: FrameCodec,
    pending: BytesMut,
    stats: DispatchStats,
}

impl Dispatcher {
    /// `channels[i]` must hold address `i + 1`.
    pub fn new(channels: Vec<Arc<Channel>>, config: DispatcherConfig) -> Self {
        Self {
            channels,
            config,
            codec: FrameCodec::new(),
            pending: BytesMut::new(),
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Handle one buffer read from the link.
    pub fn on_physical_data(&mut self, data: Bytes) {
        self.stats.reads += 1;
        if tracing::enabled!(Level::TRACE) {
            trace!(len = data.len(), bytes = %format_bytes(&data), "rx");
        }

        match self.config.policy {
            Policy::Raw => {
                if let Some(channel) = self.channels.first() {
                    let len = data.len() as u64;
                    let delivered = channel.deliver(data);
                    self.count(delivered, len);
                }
            }
            Policy::Framed if self.config.reassemble => self.reassemble(&data),
            Policy::Framed => {
                for frame in decode_frames(&data) {
                    match frame {
                        Ok(frame) => self.route(frame),
                        Err(err) => {
                            self.stats.errors += 1;
                            warn!(error = %err, len = data.len(), "malformed frame; dropping rest of read");
                        }
                    }
                }
            }
        }
    }

    fn reassemble(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        loop {
            match self.codec.decode(&mut self.pending) {
                Ok(Some(frame)) => self.route(frame),
                Ok(None) => break,
                Err(err) => {
                    self.stats.errors += 1;
                    warn!(error = %err, "malformed frame; discarding buffered bytes");
                }
            }
        }
    }

    fn route(&mut self, frame: Frame) {
        let Some(channel) = self.channels.get(frame.address.index()) else {
            self.stats.unclaimed += 1;
            warn!(address = %frame.address, "frame for a channel that does not exist");
            return;
        };
        let len = frame.payload.len() as u64;
        let delivered = channel.deliver(frame.payload);
        self.count(delivered, len);
    }

    fn count(&mut self, delivered: bool, len: u64) {
        if delivered {
            self.stats.delivered += 1;
            self.stats.bytes += len;
        } else {
            self.stats.unclaimed += 1;
        }
    }

    /// Dispatch everything from `inbound` until it closes.
    pub async fn run(mut self, mut inbound: Inbound) -> DispatchStats {
        while let Some(data) = inbound.recv().await {
            self.on_physical_data(data);
        }
        let stats = self.stats;
        info!(
            reads = stats.reads,
            delivered = stats.delivered,
            bytes = stats.bytes,
            unclaimed = stats.unclaimed,
            errors = stats.errors,
            "dispatcher stopped"
        );
        stats
    }
}
