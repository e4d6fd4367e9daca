use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serialmux_bridge::{relay, BridgeConfig, BridgeListener, ListenAddr};
use serialmux_frame::{decode_frames, Address};
use serialmux_mux::{Channel, DispatcherConfig, Multiplexer};
use serialmux_transport::{LoopbackDevice, LoopbackRemote, ManagerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(2);

fn start_mux() -> (Multiplexer, LoopbackRemote) {
    let (device, remote) = LoopbackDevice::new("loopback");
    let mux = Multiplexer::start(
        device,
        ManagerConfig {
            poll_timeout: Duration::from_millis(10),
            ..ManagerConfig::default()
        },
        DispatcherConfig::default(),
    )
    .unwrap();
    (mux, remote)
}

fn channel(mux: &Multiplexer, raw: u8) -> Arc<Channel> {
    Arc::clone(mux.channel(Address::new(raw).unwrap()).unwrap())
}

async fn listen_tcp(
    channel: Arc<Channel>,
    shutdown: &CancellationToken,
) -> (SocketAddr, JoinHandle<serialmux_bridge::Result<()>>) {
    let any = ListenAddr::Tcp(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0));
    let listener = BridgeListener::bind(&any, channel, BridgeConfig::default())
        .await
        .unwrap();
    let ListenAddr::Tcp(local) = listener.local_addr().clone() else {
        panic!("tcp listener reported a non-tcp address");
    };
    (local, tokio::spawn(listener.run(shutdown.clone())))
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Payload bytes per channel address in the next `frames` wire writes.
async fn collect_wire(remote: &mut LoopbackRemote, frames: usize) -> Vec<(u8, Vec<u8>)> {
    let mut out = Vec::new();
    while out.len() < frames {
        let wire = timeout(WAIT, remote.recv()).await.unwrap().unwrap();
        for frame in decode_frames(&wire) {
            let frame = frame.unwrap();
            out.push((frame.address.get(), frame.payload.to_vec()));
        }
    }
    out
}

#[tokio::test]
async fn tcp_client_round_trip() {
    let (mux, mut remote) = start_mux();
    let shutdown = CancellationToken::new();
    let ch1 = channel(&mux, 1);
    let (addr, _task) = listen_tcp(Arc::clone(&ch1), &shutdown).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_until(|| ch1.has_subscriber()).await;

    client.write_all(b"hello").await.unwrap();
    let wire = collect_wire(&mut remote, 1).await;
    assert_eq!(wire, vec![(1, b"hello".to_vec())]);

    remote.inject(&[1, 3, b'a', b'b', b'c']);
    let mut buf = [0u8; 3];
    timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"abc");

    shutdown.cancel();
    mux.shutdown().await;
}

#[tokio::test]
async fn clients_on_different_channels_are_isolated() {
    let (mux, mut remote) = start_mux();
    let shutdown = CancellationToken::new();
    let ch1 = channel(&mux, 1);
    let ch2 = channel(&mux, 2);
    let (addr1, _t1) = listen_tcp(Arc::clone(&ch1), &shutdown).await;
    let (addr2, _t2) = listen_tcp(Arc::clone(&ch2), &shutdown).await;

    let mut one = TcpStream::connect(addr1).await.unwrap();
    let mut two = TcpStream::connect(addr2).await.unwrap();
    wait_until(|| ch1.has_subscriber() && ch2.has_subscriber()).await;

    remote.inject(&[2, 3, b't', b'w', b'o', 1, 3, b'o', b'n', b'e']);

    let mut buf = [0u8; 3];
    timeout(WAIT, one.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"one");
    timeout(WAIT, two.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"two");

    one.write_all(b"from-one").await.unwrap();
    let first = collect_wire(&mut remote, 1).await;
    two.write_all(b"from-two").await.unwrap();
    let second = collect_wire(&mut remote, 1).await;
    assert_eq!(first, vec![(1, b"from-one".to_vec())]);
    assert_eq!(second, vec![(2, b"from-two".to_vec())]);

    // Nothing extra reached either client.
    let mut extra = [0u8; 1];
    assert!(timeout(Duration::from_millis(50), one.read(&mut extra))
        .await
        .is_err());
    assert!(timeout(Duration::from_millis(50), two.read(&mut extra))
        .await
        .is_err());

    shutdown.cancel();
    mux.shutdown().await;
}

#[tokio::test]
async fn closing_client_write_side_releases_channel() {
    let (mux, _remote) = start_mux();
    let shutdown = CancellationToken::new();
    let ch3 = channel(&mux, 3);
    let (addr, _task) = listen_tcp(Arc::clone(&ch3), &shutdown).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_until(|| ch3.has_subscriber()).await;

    client.shutdown().await.unwrap();
    wait_until(|| !ch3.has_subscriber()).await;

    let mut buf = [0u8; 8];
    let n = timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0, "server side closes the socket too");

    shutdown.cancel();
    mux.shutdown().await;
}

#[tokio::test]
async fn newer_client_replaces_older() {
    let (mux, remote) = start_mux();
    let shutdown = CancellationToken::new();
    let ch4 = channel(&mux, 4);
    let (addr, _task) = listen_tcp(Arc::clone(&ch4), &shutdown).await;

    let mut old = TcpStream::connect(addr).await.unwrap();
    wait_until(|| ch4.has_subscriber()).await;
    let mut new = TcpStream::connect(addr).await.unwrap();

    let mut buf = [0u8; 8];
    let n = timeout(WAIT, old.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0, "replaced client is disconnected");

    remote.inject(&[4, 2, b'h', b'i']);
    let mut got = [0u8; 2];
    timeout(WAIT, new.read_exact(&mut got)).await.unwrap().unwrap();
    assert_eq!(&got, b"hi");

    shutdown.cancel();
    mux.shutdown().await;
}

#[tokio::test]
async fn replaced_connection_ends_when_client_stops_reading() {
    let (mux, _remote) = start_mux();
    let ch7 = channel(&mux, 7);
    let (server, _client) = tokio::io::duplex(64);
    let subscription = ch7.subscribe();
    let task = tokio::spawn(async move {
        let config = BridgeConfig::default();
        relay(server, subscription, &config, "stalled-reader").await
    });

    // The client never reads, so the relay blocks once the duplex fills.
    for _ in 0..16 {
        assert!(ch7.deliver(Bytes::from(vec![0xAA; 64])));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let _replacement = ch7.subscribe();
    let stats = timeout(WAIT, task)
        .await
        .expect("replaced relay did not finish")
        .unwrap();
    assert!(stats.downstream < 16 * 64);

    mux.shutdown().await;
}

#[tokio::test]
async fn replaced_connection_ends_while_device_is_stalled() {
    let (mux, remote) = start_mux();
    let ch8 = channel(&mux, 8);
    let (server, mut client) = tokio::io::duplex(64);
    let subscription = ch8.subscribe();
    let task = tokio::spawn(async move {
        let config = BridgeConfig::default();
        relay(server, subscription, &config, "stalled-device").await
    });

    remote.device().pause(true);
    client.write_all(b"stuck").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let _replacement = ch8.subscribe();
    let stats = timeout(WAIT, task)
        .await
        .expect("replaced relay did not finish")
        .unwrap();
    assert_eq!(stats.upstream, 0, "the stalled send never completed");

    remote.device().pause(false);
    mux.shutdown().await;
}

#[tokio::test]
async fn cancelling_stops_listener_and_connections() {
    let (mux, _remote) = start_mux();
    let shutdown = CancellationToken::new();
    let ch5 = channel(&mux, 5);
    let (addr, task) = listen_tcp(Arc::clone(&ch5), &shutdown).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_until(|| ch5.has_subscriber()).await;

    shutdown.cancel();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();

    let mut buf = [0u8; 8];
    let n = timeout(WAIT, client.read(&mut buf)).await.unwrap().unwrap();
    assert_eq!(n, 0);
    wait_until(|| !ch5.has_subscriber()).await;

    mux.shutdown().await;
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_round_trip() {
    use tokio::net::UnixStream;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "serialmux-relay-{}-{nanos}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("ch6.sock");

    let (mux, mut remote) = start_mux();
    let shutdown = CancellationToken::new();
    let ch6 = channel(&mux, 6);
    let listener = BridgeListener::bind(
        &ListenAddr::Unix(path.clone()),
        Arc::clone(&ch6),
        BridgeConfig::default(),
    )
    .await
    .unwrap();
    let task = tokio::spawn(listener.run(shutdown.clone()));

    let mut client = UnixStream::connect(&path).await.unwrap();
    wait_until(|| ch6.has_subscriber()).await;

    client.write_all(b"uds").await.unwrap();
    assert_eq!(collect_wire(&mut remote, 1).await, vec![(6, b"uds".to_vec())]);

    remote.inject(&[6, 2, b'o', b'k']);
    let mut buf = [0u8; 2];
    timeout(WAIT, client.read_exact(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf, b"ok");

    shutdown.cancel();
    timeout(WAIT, task).await.unwrap().unwrap().unwrap();
    assert!(!path.exists(), "socket file removed when the listener stops");

    mux.shutdown().await;
    let _ = std::fs::remove_dir_all(&dir);
}
