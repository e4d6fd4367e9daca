//! Logical channels.
//!
//! A channel has at most one subscriber. Subscribing again replaces the
//! current subscriber: its token is cancelled and its queue closed, so
//! whoever owned it tears down instead of lingering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use serialmux_frame::Address;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Result;
use crate::writer::ChannelSender;

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Bytes>,
    token: CancellationToken,
}

/// One logical duplex byte endpoint on the shared link.
pub struct Channel {
    address: Address,
    sender: ChannelSender,
    subscriber: Mutex<Option<Subscriber>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl Channel {
    pub fn new(sender: ChannelSender) -> Arc<Self> {
        Arc::new(Self {
            address: sender.address(),
            sender,
            subscriber: Mutex::new(None),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// A send handle for this channel.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Send `payload` on this channel. See [`ChannelSender::send`].
    pub async fn send(&self, payload: Bytes) -> Result<usize> {
        self.sender.send(payload).await
    }

    /// Become the channel's subscriber, replacing any current one.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        self.subscribe_with(&CancellationToken::new())
    }

    /// Like [`Channel::subscribe`], with the subscription's token a child of
    /// `parent`.
    pub fn subscribe_with(self: &Arc<Self>, parent: &CancellationToken) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let token = parent.child_token();

        let previous = self.lock().replace(Subscriber {
            id,
            tx,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            info!(
                address = %self.address,
                previous = previous.id,
                subscriber = id,
                "replacing channel subscriber"
            );
            previous.token.cancel();
        }

        Subscription {
            id,
            channel: Arc::clone(self),
            rx,
            token,
        }
    }

    /// Hand received bytes to the subscriber. Returns `false` when nobody
    /// is subscribed and the bytes were dropped.
    pub fn deliver(&self, data: Bytes) -> bool {
        let mut subscriber = self.lock();
        let delivered = match subscriber.as_ref() {
            Some(current) => match current.tx.send(data) {
                Ok(()) => true,
                Err(_) => {
                    *subscriber = None;
                    false
                }
            },
            None => false,
        };
        if !delivered {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!(address = %self.address, "no subscriber; dropping received bytes");
        }
        delivered
    }

    pub fn has_subscriber(&self) -> bool {
        self.lock().is_some()
    }

    /// Deliveries dropped for lack of a subscriber.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn unsubscribe(&self, id: u64) {
        let mut subscriber = self.lock();
        if subscriber.as_ref().is_some_and(|current| current.id == id) {
            *subscriber = None;
            debug!(address = %self.address, subscriber = id, "unsubscribed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Subscriber>> {
        self.subscriber.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("address", &self.address)
            .field("subscribed", &self.has_subscriber())
            .finish()
    }
}

/// The receiving end of a channel. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    channel: Arc<Channel>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    token: CancellationToken,
}

impl Subscription {
    /// Next delivered chunk; `None` once replaced or unsubscribed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        tokio::select! {
            biased;
            data = self.rx.recv() => data,
            () = self.token.cancelled() => None,
        }
    }

    /// A chunk that is already queued, if any.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        if self.token.is_cancelled() {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Cancelled when this subscription is replaced.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    pub fn is_replaced(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.unsubscribe(self.id);
    }
}
