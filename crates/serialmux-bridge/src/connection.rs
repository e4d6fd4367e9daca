//! One client socket relayed to one channel.

use bytes::Bytes;
use serialmux_frame::format_bytes;
use serialmux_mux::{MuxError, Subscription};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, trace, warn, Level};

/// Per-connection settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Largest chunk read from the socket before it is sent to the channel.
    pub read_buffer_size: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 256,
        }
    }
}

/// Byte counts for a finished connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Client to channel.
    pub upstream: u64,
    /// Channel to client.
    pub downstream: u64,
}

/// Relay `stream` and the channel behind `subscription` until either side
/// ends.
///
/// Both directions share the subscription's token: when one stops it cancels
/// the other, and the socket is shut down. The subscription is released on
/// return.
pub async fn relay<S>(
    stream: S,
    mut subscription: Subscription,
    config: &BridgeConfig,
    peer: &str,
) -> ConnectionStats
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let token = subscription.token().clone();
    let sender = subscription.channel().sender();
    let address = sender.address();
    let (mut reader, mut writer) = tokio::io::split(stream);

    info!(%address, peer, "client connected");

    let upstream = async {
        let mut buf = vec![0u8; config.read_buffer_size.max(1)];
        let mut sent = 0u64;
        loop {
            let n = tokio::select! {
                () = token.cancelled() => break,
                read = reader.read(&mut buf) => match read {
                    Ok(0) => {
                        debug!(%address, peer, "client closed its write side");
                        break;
                    }
                    Ok(n) => n,
                    Err(err) => {
                        debug!(%address, peer, error = %err, "socket read failed");
                        break;
                    }
                },
            };
            if tracing::enabled!(Level::TRACE) {
                trace!(%address, peer, bytes = %format_bytes(&buf[..n]), "client -> channel");
            }
            // A stalled device must not pin the connection past cancellation.
            let result = tokio::select! {
                () = token.cancelled() => break,
                result = sender.send(Bytes::copy_from_slice(&buf[..n])) => result,
            };
            match result {
                Ok(_) => sent += n as u64,
                Err(MuxError::Closed) => break,
                Err(err) => warn!(%address, peer, error = %err, "channel send failed"),
            }
        }
        token.cancel();
        sent
    };

    let downstream = async {
        let mut received = 0u64;
        while let Some(data) = subscription.recv().await {
            // Nor may a client that stopped reading.
            let written = tokio::select! {
                () = token.cancelled() => break,
                written = writer.write_all(&data) => written,
            };
            if let Err(err) = written {
                debug!(%address, peer, error = %err, "socket write failed");
                break;
            }
            received += data.len() as u64;
        }
        token.cancel();
        received
    };

    let (upstream, downstream) = tokio::join!(upstream, downstream);
    let stats = ConnectionStats {
        upstream,
        downstream,
    };

    if let Err(err) = writer.shutdown().await {
        debug!(%address, peer, error = %err, "socket shutdown failed");
    }
    info!(
        %address,
        peer,
        upstream = stats.upstream,
        downstream = stats.downstream,
        "client disconnected"
    );
    stats
}
