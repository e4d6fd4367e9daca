//! Lifetime management for in-flight transfers.
//!
//! Every submitted transfer is registered in an [`Arena`] before it reaches
//! the device and stays there until its completion is observed by the
//! background io thread. The completion is then handed to the async side
//! through a oneshot (sends and one-off receives) or the [`Inbound`] queue
//! (the persistent receive). Shutdown cancels everything the device holds,
//! drains completions with zero-timeout pumps and only then reports the
//! manager as drained and closes [`Inbound`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::arena::Arena;
use crate::device::{Device, DeviceEvent};
use crate::error::{Result, TransportError};
use crate::transfer::{TransferId, TransferKind, TransferOutcome, TransferStatus};

/// Receiving side of the persistent receive.
pub type Inbound = mpsc::UnboundedReceiver<Bytes>;

/// Tuning for the transfer manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long one pump of the device may block.
    pub poll_timeout: Duration,
    /// Zero-timeout pumps performed after cancelling on shutdown.
    pub drain_rounds: usize,
    /// Buffer size of each persistent receive.
    pub receive_capacity: usize,
    /// Keep one receive armed at all times and feed [`Inbound`].
    pub auto_receive: bool,
    /// Upper bound on transfers in flight at once.
    pub max_in_flight: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_millis(250),
            drain_rounds: 2,
            receive_capacity: 64,
            auto_receive: true,
            max_in_flight: 256,
        }
    }
}

enum Completion {
    Notify(oneshot::Sender<TransferOutcome>),
    Inbound,
}

/// Bookkeeping for one submitted transfer.
struct InFlightTransfer {
    kind: TransferKind,
    /// Keeps the submitted bytes alive until the completion is observed.
    buffer: Bytes,
    completion: Completion,
}

struct Shared {
    device: Arc<dyn Device>,
    config: ManagerConfig,
    arena: Mutex<Arena<InFlightTransfer>>,
    shutdown: AtomicBool,
    drained: AtomicBool,
    /// Taken once the io thread has drained, which closes [`Inbound`].
    inbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    completed: AtomicU64,
}

/// Owns the background io thread and every in-flight transfer.
pub struct TransferManager {
    shared: Arc<Shared>,
    io_thread: Mutex<Option<JoinHandle<()>>>,
}

/// Resolves once the device reports the transfer.
///
/// Resolves to a cancelled outcome if the manager went away without a
/// completion.
#[must_use = "a pending transfer does nothing unless awaited"]
#[derive(Debug)]
pub struct PendingTransfer {
    id: TransferId,
    rx: oneshot::Receiver<TransferOutcome>,
}

impl PendingTransfer {
    pub fn id(&self) -> TransferId {
        self.id
    }
}

impl Future for PendingTransfer {
    type Output = TransferOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<TransferOutcome> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(TransferOutcome::cancelled()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl TransferManager {
    /// Start the io thread for `device`.
    ///
    /// With `auto_receive` set, the persistent receive is armed before this
    /// returns and its data arrives on the returned [`Inbound`].
    pub fn start(device: Arc<dyn Device>, config: ManagerConfig) -> Result<(Self, Inbound)> {
        let (inbound, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            arena: Mutex::new(Arena::with_capacity(config.max_in_flight)),
            device,
            config,
            shutdown: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            inbound: Mutex::new(Some(inbound)),
            completed: AtomicU64::new(0),
        });

        if shared.config.auto_receive {
            shared.submit_persistent_receive()?;
        }

        let thread_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("serialmux-io".into())
            .spawn(move || run_io_loop(thread_shared))
            .map_err(TransportError::Spawn)?;

        info!(
            device = shared.device.name(),
            poll_ms = shared.config.poll_timeout.as_millis() as u64,
            "transfer manager started"
        );

        Ok((
            Self {
                shared,
                io_thread: Mutex::new(Some(handle)),
            },
            rx,
        ))
    }

    /// Submit `data` for transmission.
    ///
    /// Submission failures are reported here; the returned future only
    /// resolves with the device's completion.
    pub fn submit_send(&self, data: Bytes) -> Result<PendingTransfer> {
        let (tx, rx) = oneshot::channel();
        let len = data.len();
        let id = self.shared.register(InFlightTransfer {
            kind: TransferKind::Send,
            buffer: data.clone(),
            completion: Completion::Notify(tx),
        })?;

        if let Err(err) = self.shared.device.submit_send(id, data) {
            self.shared.unregister(id);
            return Err(err);
        }
        trace!(%id, len, "send submitted");
        Ok(PendingTransfer { id, rx })
    }

    /// Submit a one-off receive of up to `capacity` bytes.
    pub fn submit_receive(&self, capacity: usize) -> Result<PendingTransfer> {
        let (tx, rx) = oneshot::channel();
        let id = self.shared.register(InFlightTransfer {
            kind: TransferKind::Receive,
            buffer: Bytes::new(),
            completion: Completion::Notify(tx),
        })?;

        if let Err(err) = self.shared.device.submit_receive(id, capacity) {
            self.shared.unregister(id);
            return Err(err);
        }
        trace!(%id, capacity, "receive submitted");
        Ok(PendingTransfer { id, rx })
    }

    /// Cancel everything in flight and wait for the io thread to drain.
    ///
    /// After this returns no completion will fire. Calling it again is a
    /// no-op.
    pub fn shutdown(&self) {
        {
            // Held so no submission can slip in between the flag and the drain.
            let _arena = self.shared.lock_arena();
            self.shared.shutdown.store(true, Ordering::Release);
        }

        let handle = self
            .io_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };
        if handle.join().is_err() {
            warn!(
                device = self.shared.device.name(),
                "io thread panicked before draining"
            );
            return;
        }
        info!(
            device = self.shared.device.name(),
            completed = self.shared.completed.load(Ordering::Relaxed),
            "transfer manager drained"
        );
    }

    /// Whether shutdown finished and every transfer has been reported.
    pub fn is_drained(&self) -> bool {
        self.shared.drained.load(Ordering::Acquire)
    }

    /// Transfers submitted but not yet completed.
    pub fn in_flight(&self) -> usize {
        self.shared.lock_arena().len()
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.shared.device
    }
}

impl Drop for TransferManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn lock_arena(&self) -> MutexGuard<'_, Arena<InFlightTransfer>> {
        self.arena.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, transfer: InFlightTransfer) -> Result<TransferId> {
        let mut arena = self.lock_arena();
        if self.shutdown.load(Ordering::Acquire) {
            return Err(TransportError::Shutdown);
        }
        arena.insert(transfer).map_err(|_| TransportError::ArenaFull {
            max: self.config.max_in_flight,
        })
    }

    fn unregister(&self, id: TransferId) {
        self.lock_arena().remove(id);
    }

    fn submit_persistent_receive(&self) -> Result<()> {
        let id = self.register(InFlightTransfer {
            kind: TransferKind::Receive,
            buffer: Bytes::new(),
            completion: Completion::Inbound,
        })?;
        if let Err(err) = self
            .device
            .submit_receive(id, self.config.receive_capacity)
        {
            self.unregister(id);
            return Err(err);
        }
        Ok(())
    }

    fn complete(&self, event: DeviceEvent) {
        let Some(transfer) = self.lock_arena().remove(event.id) else {
            debug!(id = %event.id, status = %event.status, "completion for unknown transfer");
            return;
        };
        let outcome = TransferOutcome {
            status: event.status,
            actual_length: event.actual_length,
            data: event.data,
        };
        trace!(
            id = %event.id,
            kind = ?transfer.kind,
            status = %outcome.status,
            len = outcome.actual_length,
            "transfer completed"
        );
        self.finish(transfer, outcome);
    }

    fn finish(&self, transfer: InFlightTransfer, outcome: TransferOutcome) {
        let InFlightTransfer {
            buffer, completion, ..
        } = transfer;
        self.completed.fetch_add(1, Ordering::Relaxed);
        match completion {
            Completion::Notify(tx) => {
                // The submitter may have stopped waiting.
                let _ = tx.send(outcome);
            }
            Completion::Inbound => self.on_persistent_receive(outcome),
        }
        drop(buffer);
    }

    fn on_persistent_receive(&self, outcome: TransferOutcome) {
        let status = outcome.status;
        let rearm = matches!(status, TransferStatus::Completed | TransferStatus::TimedOut);

        if rearm && !outcome.data.is_empty() {
            let inbound = self.inbound.lock().unwrap_or_else(PoisonError::into_inner);
            let delivered = inbound
                .as_ref()
                .is_some_and(|tx| tx.send(outcome.data).is_ok());
            if !delivered {
                debug!("inbound receiver dropped; discarding received bytes");
            }
        }

        if !rearm {
            if status == TransferStatus::Cancelled {
                debug!("persistent receive cancelled");
            } else {
                warn!(
                    device = self.device.name(),
                    %status,
                    "persistent receive failed; not resubmitting"
                );
            }
            return;
        }

        if self.shutdown.load(Ordering::Acquire) {
            return;
        }
        match self.submit_persistent_receive() {
            Ok(()) => {}
            Err(TransportError::Shutdown) => {}
            Err(err) => warn!(error = %err, "failed to resubmit persistent receive"),
        }
    }
}

fn run_io_loop(shared: Arc<Shared>) {
    debug!(device = shared.device.name(), "io thread started");

    while !shared.shutdown.load(Ordering::Acquire) {
        match shared.device.pump_events(shared.config.poll_timeout) {
            Ok(events) => {
                for event in events {
                    shared.complete(event);
                }
            }
            Err(err) => {
                warn!(error = %err, "pumping device events failed");
                std::thread::sleep(shared.config.poll_timeout);
            }
        }
    }

    shared.device.cancel_all();
    for round in 0..shared.config.drain_rounds {
        if shared.lock_arena().is_empty() {
            break;
        }
        match shared.device.pump_events(Duration::ZERO) {
            Ok(events) => {
                trace!(round, count = events.len(), "drain round");
                for event in events {
                    shared.complete(event);
                }
            }
            Err(err) => {
                debug!(error = %err, "drain pump failed");
                break;
            }
        }
    }

    let leftovers = shared.lock_arena().drain();
    if !leftovers.is_empty() {
        debug!(
            count = leftovers.len(),
            "device did not report every transfer; completing as cancelled"
        );
    }
    for (_, transfer) in leftovers {
        shared.finish(transfer, TransferOutcome::cancelled());
    }

    shared
        .inbound
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    shared.drained.store(true, Ordering::Release);
    debug!(device = shared.device.name(), "io thread stopped");
}
