//! The single writer of the physical link.
//!
//! Every channel send becomes a [`WriteRequest`] on one queue. The writer
//! task takes requests one at a time and submits each frame only after the
//! previous one completed, so the frames of one message are contiguous on the
//! wire.

use std::sync::Arc;

use bytes::Bytes;
use serialmux_frame::{format_bytes, fragment, Address, HEADER_SIZE};
use serialmux_transport::{TransferManager, TransferOutcome};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, Level};

use crate::error::{MuxError, Result};
use crate::policy::Policy;

/// One message waiting for the physical link.
#[derive(Debug)]
pub struct WriteRequest {
    pub address: Address,
    pub payload: Bytes,
    pub reply: oneshot::Sender<Result<usize>>,
}

/// Send capability for one channel.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    address: Address,
    queue: mpsc::UnboundedSender<WriteRequest>,
}

impl ChannelSender {
    pub fn new(address: Address, queue: mpsc::UnboundedSender<WriteRequest>) -> Self {
        Self { address, queue }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Queue `payload` and wait until it is on the wire.
    ///
    /// Resolves with the length of the last chunk written (the whole payload
    /// under the raw policy).
    pub async fn send(&self, payload: Bytes) -> Result<usize> {
        let (reply, rx) = oneshot::channel();
        self.queue
            .send(WriteRequest {
                address: self.address,
                payload,
                reply,
            })
            .map_err(|_| MuxError::Closed)?;
        rx.await.map_err(|_| MuxError::Closed)?
    }
}

/// Start the writer task. It ends once every sender is dropped.
pub fn spawn_writer(
    manager: Arc<TransferManager>,
    policy: Policy,
) -> (mpsc::UnboundedSender<WriteRequest>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let writer = Writer {
        manager,
        policy,
        rx,
        messages: 0,
        frames: 0,
    };
    (tx, tokio::spawn(writer.run()))
}

struct Writer {
    manager: Arc<TransferManager>,
    policy: Policy,
    rx: mpsc::UnboundedReceiver<WriteRequest>,
    messages: u64,
    frames: u64,
}

impl Writer {
    async fn run(mut self) {
        while let Some(request) = self.rx.recv().await {
            let WriteRequest {
                address,
                payload,
                reply,
            } = request;
            let result = self.write(address, payload).await;
            if let Err(err) = &result {
                debug!(%address, error = %err, "channel send failed");
            }
            // The caller may have given up waiting.
            let _ = reply.send(result);
        }
        debug!(
            messages = self.messages,
            frames = self.frames,
            "writer stopped"
        );
    }

    async fn write(&mut self, address: Address, payload: Bytes) -> Result<usize> {
        self.messages += 1;
        match self.policy {
            Policy::Raw => {
                if payload.is_empty() {
                    return Ok(0);
                }
                self.submit(address, payload).await
            }
            Policy::Framed => {
                let mut last = 0;
                for wire in fragment(address, payload) {
                    let chunk = wire.len() - HEADER_SIZE;
                    match self.submit(address, wire).await {
                        Ok(_) => last = chunk,
                        Err(MuxError::SendFailed { status, .. }) => {
                            return Err(MuxError::SendFailed { status, len: chunk })
                        }
                        Err(err) => return Err(err),
                    }
                }
                Ok(last)
            }
        }
    }

    async fn submit(&mut self, address: Address, wire: Bytes) -> Result<usize> {
        if tracing::enabled!(Level::TRACE) {
            trace!(%address, len = wire.len(), bytes = %format_bytes(&wire), "tx");
        }
        let TransferOutcome {
            status,
            actual_length,
            ..
        } = self.manager.submit_send(wire)?.await;
        self.frames += 1;
        if status.is_success() {
            Ok(actual_length)
        } else {
            Err(MuxError::SendFailed {
                status,
                len: actual_length,
            })
        }
    }
}
