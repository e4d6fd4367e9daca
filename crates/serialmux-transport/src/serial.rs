//! Serial port device with reconnection.
//!
//! The port starts out closed and is opened on demand. A read or write error
//! closes it; the armed receive stays armed across the close so data flows
//! again as soon as the port is reopened, either by the next send or by the
//! periodic reviver.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::device::{Device, DeviceEvent};
use crate::error::{Result, TransportError};
use crate::line::{configure, LineConfig};
use crate::transfer::{TransferId, TransferStatus};

/// Byte stream of an opened port.
pub trait PortIo: Read + Write + Send {}

impl<T: Read + Write + Send + ?Sized> PortIo for T {}

/// Opens the port behind a [`SerialDevice`].
pub trait PortOpener: Send + Sync + 'static {
    fn open(&self, path: &str, line: &LineConfig) -> io::Result<Box<dyn PortIo>>;
}

/// Opens real ports through `serialport`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPortOpener;

impl PortOpener for SystemPortOpener {
    fn open(&self, path: &str, line: &LineConfig) -> io::Result<Box<dyn PortIo>> {
        let port = configure(serialport::new(path, line.baud_rate), line).open()?;
        if let Err(err) = port.clear(serialport::ClearBuffer::All) {
            debug!(path, error = %err, "failed to purge port buffers");
        }
        Ok(Box::new(port))
    }
}

/// Whether the physical port is currently open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Open,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Closed => f.write_str("closed"),
            LinkState::Open => f.write_str("open"),
        }
    }
}

#[derive(Default)]
struct SerialQueue {
    sends: VecDeque<(TransferId, Bytes)>,
    receive: Option<(TransferId, usize)>,
    cancelled: Vec<TransferId>,
}

/// A [`Device`] backed by a serial port.
pub struct SerialDevice {
    path: String,
    line: LineConfig,
    opener: Box<dyn PortOpener>,
    port: Mutex<Option<Box<dyn PortIo>>>,
    queue: Mutex<SerialQueue>,
    ready: Condvar,
    state: watch::Sender<LinkState>,
}

impl SerialDevice {
    /// A closed device for `path`.
    pub fn new(path: impl Into<String>, line: LineConfig, opener: Box<dyn PortOpener>) -> Self {
        let (state, _) = watch::channel(LinkState::Closed);
        Self {
            path: path.into(),
            line,
            opener,
            port: Mutex::new(None),
            queue: Mutex::new(SerialQueue::default()),
            ready: Condvar::new(),
            state,
        }
    }

    /// Open `path` with the system opener.
    pub fn open(path: impl Into<String>, line: LineConfig) -> Result<Self> {
        let device = Self::new(path, line, Box::new(SystemPortOpener));
        device.try_reopen()?;
        Ok(device)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn line(&self) -> &LineConfig {
        &self.line
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch link state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Open the port if it is closed.
    pub fn try_reopen(&self) -> Result<LinkState> {
        let mut port = self.lock_port();
        if port.is_some() {
            return Ok(LinkState::Open);
        }
        match self.opener.open(&self.path, &self.line) {
            Ok(opened) => {
                *port = Some(opened);
                drop(port);
                self.state.send_replace(LinkState::Open);
                info!(path = %self.path, line = %self.line, "serial port opened");
                self.ready.notify_all();
                Ok(LinkState::Open)
            }
            Err(source) => Err(TransportError::Open {
                path: self.path.clone().into(),
                source,
            }),
        }
    }

    fn lock_port(&self) -> MutexGuard<'_, Option<Box<dyn PortIo>>> {
        self.port.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_queue(&self) -> MutexGuard<'_, SerialQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_closed(&self, reason: &dyn fmt::Display) {
        if self.state.send_replace(LinkState::Closed) == LinkState::Open {
            warn!(path = %self.path, %reason, "serial link lost");
        }
    }

    fn write_one(&self, id: TransferId, data: &[u8]) -> DeviceEvent {
        let mut guard = self.lock_port();
        let Some(port) = guard.as_mut() else {
            return DeviceEvent::sent(id, TransferStatus::NoDevice, 0);
        };
        match port.write_all(data).and_then(|()| port.flush()) {
            Ok(()) => DeviceEvent::sent(id, TransferStatus::Completed, data.len()),
            Err(err) => {
                *guard = None;
                drop(guard);
                self.mark_closed(&err);
                DeviceEvent::sent(id, TransferStatus::Error, 0)
            }
        }
    }

    /// One bounded read. `None` when nothing arrived or the port is closed.
    fn read_once(&self, capacity: usize) -> Option<Bytes> {
        let mut guard = self.lock_port();
        let port = guard.as_mut()?;
        let mut buf = vec![0u8; capacity];
        match port.read(&mut buf) {
            Ok(0) => {
                *guard = None;
                drop(guard);
                self.mark_closed(&"end of stream");
                None
            }
            Ok(n) => {
                buf.truncate(n);
                Some(Bytes::from(buf))
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                None
            }
            Err(err) => {
                *guard = None;
                drop(guard);
                self.mark_closed(&err);
                None
            }
        }
    }
}

impl Device for SerialDevice {
    fn name(&self) -> &str {
        &self.path
    }

    fn submit_receive(&self, id: TransferId, capacity: usize) -> Result<()> {
        let mut queue = self.lock_queue();
        if let Some((armed, _)) = queue.receive {
            return Err(TransportError::Submit(format!(
                "receive {armed} is already armed on {}",
                self.path
            )));
        }
        queue.receive = Some((id, capacity));
        drop(queue);
        self.ready.notify_all();
        Ok(())
    }

    fn submit_send(&self, id: TransferId, data: Bytes) -> Result<()> {
        self.lock_queue().sends.push_back((id, data));
        self.ready.notify_all();
        Ok(())
    }

    fn cancel_all(&self) {
        let mut queue = self.lock_queue();
        let sends: Vec<TransferId> = queue.sends.drain(..).map(|(id, _)| id).collect();
        queue.cancelled.extend(sends);
        if let Some((id, _)) = queue.receive.take() {
            queue.cancelled.push(id);
        }
        drop(queue);
        self.ready.notify_all();
    }

    fn pump_events(&self, timeout: Duration) -> Result<Vec<DeviceEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            let (cancelled, sends, receive) = {
                let mut queue = self.lock_queue();
                let cancelled = std::mem::take(&mut queue.cancelled);
                let sends: Vec<(TransferId, Bytes)> = queue.sends.drain(..).collect();
                (cancelled, sends, queue.receive)
            };

            let mut events: Vec<DeviceEvent> =
                cancelled.into_iter().map(DeviceEvent::cancelled).collect();
            // Opening can block; it happens here on the io thread, never on
            // the submitting task.
            if !sends.is_empty() && self.state() == LinkState::Closed {
                if let Err(err) = self.try_reopen() {
                    debug!(error = %err, "reopen before send failed");
                }
            }
            for (id, data) in sends {
                events.push(self.write_one(id, &data));
            }

            let reading = receive.is_some() && self.state() == LinkState::Open;
            if let Some((id, capacity)) = receive.filter(|_| reading) {
                if let Some(data) = self.read_once(capacity) {
                    let mut queue = self.lock_queue();
                    if queue.receive.map(|(armed, _)| armed) == Some(id) {
                        queue.receive = None;
                        trace!(len = data.len(), "serial read");
                        events.push(DeviceEvent::received(id, TransferStatus::Completed, data));
                    } else {
                        debug!(len = data.len(), "receive cancelled during read; dropping bytes");
                    }
                }
            }

            let now = Instant::now();
            if !events.is_empty() || now >= deadline {
                return Ok(events);
            }
            if !reading {
                let queue = self.lock_queue();
                if queue.sends.is_empty() && queue.cancelled.is_empty() {
                    // Spurious or timed-out wakeups just loop again.
                    let _ = self
                        .ready
                        .wait_timeout(queue, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}

/// Tuning for the reopen loop.
#[derive(Debug, Clone)]
pub struct ReviverConfig {
    pub period: Duration,
}

impl Default for ReviverConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
        }
    }
}

/// Periodically try to reopen `device` while its link is closed.
///
/// Abort the returned handle to stop.
pub fn spawn_reviver(device: Arc<SerialDevice>, config: ReviverConfig) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if device.state() == LinkState::Open {
                continue;
            }
            let target = Arc::clone(&device);
            match tokio::task::spawn_blocking(move || target.try_reopen()).await {
                Ok(Ok(_)) => info!(path = device.path(), "serial link revived"),
                Ok(Err(err)) => debug!(error = %err, "revive attempt failed"),
                Err(err) => warn!(error = %err, "revive task failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::manager::{ManagerConfig, TransferManager};

    #[derive(Default)]
    struct WireState {
        to_host: VecDeque<u8>,
        from_host: Vec<u8>,
        present: bool,
        fail_next_read: bool,
        opens: usize,
    }

    #[derive(Clone, Default)]
    struct Wire(Arc<Mutex<WireState>>);

    impl Wire {
        fn with<R>(&self, f: impl FnOnce(&mut WireState) -> R) -> R {
            f(&mut self.0.lock().unwrap())
        }
    }

    struct MemoryPort(Wire);

    impl Read for MemoryPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let result = self.0.with(|w| {
                if w.fail_next_read {
                    w.fail_next_read = false;
                    return Some(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));
                }
                if w.to_host.is_empty() {
                    return None;
                }
                let n = buf.len().min(w.to_host.len());
                for (slot, byte) in buf.iter_mut().zip(w.to_host.drain(..n)) {
                    *slot = byte;
                }
                Some(Ok(n))
            });
            match result {
                Some(result) => result,
                None => {
                    std::thread::sleep(Duration::from_millis(2));
                    Err(io::Error::new(io::ErrorKind::TimedOut, "no data"))
                }
            }
        }
    }

    impl Write for MemoryPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.with(|w| w.from_host.extend_from_slice(buf));
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct MemoryOpener(Wire);

    impl PortOpener for MemoryOpener {
        fn open(&self, _path: &str, _line: &LineConfig) -> io::Result<Box<dyn PortIo>> {
            self.0.with(|w| {
                if !w.present {
                    return Err(io::Error::new(io::ErrorKind::NotFound, "no such device"));
                }
                w.opens += 1;
                Ok(())
            })?;
            Ok(Box::new(MemoryPort(self.0.clone())))
        }
    }

    fn device(wire: &Wire) -> Arc<SerialDevice> {
        Arc::new(SerialDevice::new(
            "/dev/ttyTEST0",
            LineConfig::default(),
            Box::new(MemoryOpener(wire.clone())),
        ))
    }

    fn config() -> ManagerConfig {
        ManagerConfig {
            poll_timeout: Duration::from_millis(10),
            ..ManagerConfig::default()
        }
    }

    async fn wait_for(rx: &mut watch::Receiver<LinkState>, want: LinkState) {
        timeout(Duration::from_secs(2), rx.wait_for(|state| *state == want))
            .await
            .expect("link state did not change in time")
            .unwrap();
    }

    #[test]
    fn open_failure_leaves_device_closed() {
        let wire = Wire::default();
        let device = device(&wire);
        let err = device.try_reopen().unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
        assert_eq!(device.state(), LinkState::Closed);
    }

    #[test]
    fn reopen_is_idempotent() {
        let wire = Wire::default();
        wire.with(|w| w.present = true);
        let device = device(&wire);
        assert_eq!(device.try_reopen().unwrap(), LinkState::Open);
        assert_eq!(device.try_reopen().unwrap(), LinkState::Open);
        assert_eq!(wire.with(|w| w.opens), 1);
    }

    #[test]
    fn only_one_receive_may_be_armed() {
        let wire = Wire::default();
        let device = device(&wire);
        device
            .submit_receive(TransferId::from_parts(0, 0), 64)
            .unwrap();
        assert!(device
            .submit_receive(TransferId::from_parts(1, 0), 64)
            .is_err());
    }

    #[tokio::test]
    async fn send_while_absent_reports_no_device() {
        let wire = Wire::default();
        let (manager, _inbound) = TransferManager::start(device(&wire), config()).unwrap();

        let outcome = manager
            .submit_send(Bytes::from_static(b"lost"))
            .unwrap()
            .await;
        assert_eq!(outcome.status, TransferStatus::NoDevice);
    }

    #[tokio::test]
    async fn send_while_closed_reopens_first() {
        let wire = Wire::default();
        wire.with(|w| w.present = true);
        let device = device(&wire);
        let (manager, _inbound) = TransferManager::start(device.clone(), config()).unwrap();
        assert_eq!(device.state(), LinkState::Closed);

        let outcome = manager
            .submit_send(Bytes::from_static(b"wake"))
            .unwrap()
            .await;
        assert_eq!(outcome.status, TransferStatus::Completed);
        assert_eq!(outcome.actual_length, 4);
        assert_eq!(device.state(), LinkState::Open);
        assert_eq!(wire.with(|w| w.from_host.clone()), b"wake");
    }

    #[test]
    fn submitting_a_send_never_opens_the_port() {
        let wire = Wire::default();
        wire.with(|w| w.present = true);
        let device = device(&wire);
        let id = TransferId::from_parts(0, 0);

        device.submit_send(id, Bytes::from_static(b"hi")).unwrap();
        assert_eq!(wire.with(|w| w.opens), 0);
        assert_eq!(device.state(), LinkState::Closed);

        let events = device.pump_events(Duration::from_millis(10)).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, id);
        assert_eq!(events[0].status, TransferStatus::Completed);
        assert_eq!(wire.with(|w| w.opens), 1);
        assert_eq!(wire.with(|w| w.from_host.clone()), b"hi");
    }

    #[tokio::test]
    async fn receive_survives_unplug_and_revive() {
        let wire = Wire::default();
        wire.with(|w| w.present = true);
        let device = device(&wire);
        device.try_reopen().unwrap();
        let mut link = device.subscribe_state();

        let (manager, mut inbound) = TransferManager::start(device.clone(), config()).unwrap();

        wire.with(|w| w.to_host.extend(b"abc"));
        let data = timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.as_ref(), b"abc");

        wire.with(|w| {
            w.present = false;
            w.fail_next_read = true;
        });
        wait_for(&mut link, LinkState::Closed).await;

        let reviver = spawn_reviver(
            device.clone(),
            ReviverConfig {
                period: Duration::from_millis(20),
            },
        );
        wire.with(|w| w.present = true);
        wait_for(&mut link, LinkState::Open).await;

        wire.with(|w| w.to_host.extend(b"xyz"));
        let data = timeout(Duration::from_secs(2), inbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data.as_ref(), b"xyz");

        reviver.abort();
        manager.shutdown();
        assert!(manager.is_drained());
        assert_eq!(wire.with(|w| w.opens), 2);
    }
}
