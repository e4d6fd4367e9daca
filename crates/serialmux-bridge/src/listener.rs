use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serialmux_mux::Channel;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::addr::ListenAddr;
use crate::connection::{relay, BridgeConfig};
use crate::error::{BridgeError, Result};
#[cfg(unix)]
use crate::uds::UnixSocketListener;

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixSocketListener),
}

/// Accepts clients for one channel.
pub struct BridgeListener {
    inner: Inner,
    local: ListenAddr,
    channel: Arc<Channel>,
    config: BridgeConfig,
    next_id: AtomicU64,
}

impl BridgeListener {
    /// Bind `addr` for `channel`. Must be called inside a tokio runtime.
    pub async fn bind(
        addr: &ListenAddr,
        channel: Arc<Channel>,
        config: BridgeConfig,
    ) -> Result<Self> {
        let (inner, local) = match addr {
            ListenAddr::Tcp(socket_addr) => {
                let listener =
                    TcpListener::bind(socket_addr)
                        .await
                        .map_err(|source| BridgeError::Bind {
                            addr: addr.to_string(),
                            source,
                        })?;
                let local = listener.local_addr()?;
                (Inner::Tcp(listener), ListenAddr::Tcp(local))
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                let listener = UnixSocketListener::bind(path)?;
                (Inner::Unix(listener), addr.clone())
            }
            #[cfg(not(unix))]
            ListenAddr::Unix(_) => {
                return Err(BridgeError::InvalidAddr(format!(
                    "{addr} (unix sockets are not supported on this platform)"
                )))
            }
        };

        info!(address = %channel.address(), listen = %local, "bridge listening");
        Ok(Self {
            inner,
            local,
            channel,
            config,
            next_id: AtomicU64::new(1),
        })
    }

    /// The bound address; for TCP this carries the actual port.
    pub fn local_addr(&self) -> &ListenAddr {
        &self.local
    }

    pub fn channel(&self) -> &Arc<Channel> {
        &self.channel
    }

    /// Accept until `shutdown` is cancelled or accepting fails for good.
    ///
    /// Every connection's subscription token is a child of `shutdown`, so
    /// cancelling it also ends open connections.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => {
                    info!(listen = %self.local, "bridge listener stopped");
                    return Ok(());
                }
                accepted = self.accept(&shutdown) => accepted,
            };
            match accepted {
                Ok(()) => {}
                Err(err) if is_transient(&err) => {
                    warn!(listen = %self.local, error = %err, "transient accept error");
                }
                Err(err) => return Err(BridgeError::Accept(err)),
            }
        }
    }

    async fn accept(&self, shutdown: &CancellationToken) -> io::Result<()> {
        match &self.inner {
            Inner::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                if let Err(err) = stream.set_nodelay(true) {
                    debug!(error = %err, "failed to set TCP_NODELAY");
                }
                self.spawn_connection(stream, peer.to_string(), shutdown);
            }
            #[cfg(unix)]
            Inner::Unix(listener) => {
                let stream = listener.accept().await?;
                self.spawn_connection(stream, "unix".to_string(), shutdown);
            }
        }
        Ok(())
    }

    fn spawn_connection<S>(&self, stream: S, peer: String, shutdown: &CancellationToken)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscription = self.channel.subscribe_with(shutdown);
        let config = self.config.clone();
        debug!(connection = id, peer, "spawning connection");
        tokio::spawn(async move {
            relay(stream, subscription, &config, &peer).await;
        });
    }
}

/// Accept errors that concern one would-be connection, not the listener.
fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Run every listener until `shutdown` is cancelled.
///
/// A listener that fails is logged and the others keep serving their
/// channels. The first failure is returned once every listener has stopped.
pub async fn run_all(listeners: Vec<BridgeListener>, shutdown: CancellationToken) -> Result<()> {
    let mut set = JoinSet::new();
    for listener in listeners {
        set.spawn(listener.run(shutdown.clone()));
    }
    join_listeners(set).await
}

async fn join_listeners(mut set: JoinSet<Result<()>>) -> Result<()> {
    let mut first_error = None;
    let mut failed = 0usize;
    while let Some(joined) = set.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(err) => Err(BridgeError::Io(io::Error::other(err.to_string()))),
        };
        if let Err(err) = result {
            failed += 1;
            warn!(error = %err, remaining = set.len(), "bridge listener failed");
            first_error.get_or_insert(err);
        }
    }
    if failed > 1 {
        warn!(failed, "multiple bridge listeners failed");
    }
    first_error.map_or(Ok(()), Err)
}
