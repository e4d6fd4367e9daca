//! In-memory device for tests and the `loopback` command.
//!
//! The far end is a [`LoopbackRemote`]: bytes it injects complete armed
//! receives, and every completed send is handed to it in submission order.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::device::{Device, DeviceEvent};
use crate::error::{Result, TransportError};
use crate::transfer::{TransferId, TransferStatus};

#[derive(Default)]
struct LoopState {
    receives: VecDeque<(TransferId, usize)>,
    sends: VecDeque<(TransferId, Bytes)>,
    cancelled: Vec<TransferId>,
    incoming: BytesMut,
    paused: bool,
    reject_submissions: bool,
    fail_sends: Option<TransferStatus>,
}

/// A [`Device`] whose physical side is a pair of in-memory queues.
pub struct LoopbackDevice {
    name: String,
    state: Mutex<LoopState>,
    ready: Condvar,
    remote_tx: mpsc::UnboundedSender<Bytes>,
}

/// The far end of a [`LoopbackDevice`].
pub struct LoopbackRemote {
    device: Arc<LoopbackDevice>,
    written: mpsc::UnboundedReceiver<Bytes>,
}

impl LoopbackDevice {
    pub fn new(name: impl Into<String>) -> (Arc<Self>, LoopbackRemote) {
        let (remote_tx, written) = mpsc::unbounded_channel();
        let device = Arc::new(Self {
            name: name.into(),
            state: Mutex::new(LoopState::default()),
            ready: Condvar::new(),
            remote_tx,
        });
        let remote = LoopbackRemote {
            device: Arc::clone(&device),
            written,
        };
        (device, remote)
    }

    /// Stop completing sends and receives. Cancellations still complete.
    pub fn pause(&self, paused: bool) {
        self.update(|state| state.paused = paused);
    }

    /// Make every submission fail synchronously.
    pub fn reject_submissions(&self, reject: bool) {
        self.update(|state| state.reject_submissions = reject);
    }

    /// Complete sends with `status` and no bytes written, or clear with `None`.
    pub fn fail_sends(&self, status: Option<TransferStatus>) {
        self.update(|state| state.fail_sends = status);
    }

    /// Bytes arriving from the far end.
    pub fn inject(&self, data: &[u8]) {
        self.update(|state| state.incoming.extend_from_slice(data));
    }

    /// Transfers the device currently holds.
    pub fn outstanding(&self) -> usize {
        let state = self.lock();
        state.receives.len() + state.sends.len() + state.cancelled.len()
    }

    fn lock(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, f: impl FnOnce(&mut LoopState)) {
        f(&mut self.lock());
        self.ready.notify_all();
    }

    fn take_ready(&self, state: &mut LoopState) -> Vec<DeviceEvent> {
        let mut events: Vec<DeviceEvent> = state
            .cancelled
            .drain(..)
            .map(DeviceEvent::cancelled)
            .collect();
        if state.paused {
            return events;
        }

        while let Some((id, data)) = state.sends.pop_front() {
            let event = match state.fail_sends {
                Some(status) => DeviceEvent::sent(id, status, 0),
                None => {
                    let len = data.len();
                    // The remote may already be gone; the send still completed.
                    let _ = self.remote_tx.send(data);
                    DeviceEvent::sent(id, TransferStatus::Completed, len)
                }
            };
            events.push(event);
        }

        while !state.incoming.is_empty() {
            let Some((id, capacity)) = state.receives.pop_front() else {
                break;
            };
            let take = capacity.min(state.incoming.len());
            let chunk = state.incoming.split_to(take).freeze();
            events.push(DeviceEvent::received(id, TransferStatus::Completed, chunk));
        }
        events
    }

    fn submit(&self, f: impl FnOnce(&mut LoopState)) -> Result<()> {
        let mut state = self.lock();
        if state.reject_submissions {
            return Err(TransportError::Submit(format!(
                "{} rejected the submission",
                self.name
            )));
        }
        f(&mut state);
        drop(state);
        self.ready.notify_all();
        Ok(())
    }
}

impl Device for LoopbackDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn submit_receive(&self, id: TransferId, capacity: usize) -> Result<()> {
        self.submit(|state| state.receives.push_back((id, capacity)))
    }

    fn submit_send(&self, id: TransferId, data: Bytes) -> Result<()> {
        self.submit(|state| state.sends.push_back((id, data)))
    }

    fn cancel_all(&self) {
        self.update(|state| {
            let receives = state.receives.drain(..).map(|(id, _)| id);
            let sends = state.sends.drain(..).map(|(id, _)| id);
            let ids: Vec<TransferId> = receives.chain(sends).collect();
            state.cancelled.extend(ids);
        });
    }

    fn pump_events(&self, timeout: Duration) -> Result<Vec<DeviceEvent>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let events = self.take_ready(&mut state);
            if !events.is_empty() {
                return Ok(events);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(events);
            }
            let (guard, _) = self
                .ready
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
    }
}

impl LoopbackRemote {
    /// Bytes arriving from the far end.
    pub fn inject(&self, data: &[u8]) {
        self.device.inject(data);
    }

    /// Next buffer the host sent, in submission order.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.written.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.written.try_recv().ok()
    }

    pub fn device(&self) -> &Arc<LoopbackDevice> {
        &self.device
    }
}
