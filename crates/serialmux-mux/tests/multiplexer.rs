use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serialmux_frame::{decode_frames, Address, MAX_PAYLOAD};
use serialmux_mux::{DispatcherConfig, Multiplexer, MuxError, Policy};
use serialmux_transport::{LoopbackDevice, LoopbackRemote, ManagerConfig};
use tokio::time::timeout;

fn manager_config() -> ManagerConfig {
    ManagerConfig {
        poll_timeout: Duration::from_millis(10),
        ..ManagerConfig::default()
    }
}

fn start(policy: Policy) -> (Multiplexer, LoopbackRemote) {
    let (device, remote) = LoopbackDevice::new("loopback");
    let mux = Multiplexer::start(
        device,
        manager_config(),
        DispatcherConfig {
            policy,
            reassemble: false,
        },
    )
    .unwrap();
    (mux, remote)
}

fn addr(raw: u8) -> Address {
    Address::new(raw).unwrap()
}

#[tokio::test]
async fn concurrent_messages_stay_contiguous_on_the_wire() {
    let (mux, mut remote) = start(Policy::Framed);
    let a = Arc::clone(mux.channel(addr(1)).unwrap());
    let b = Arc::clone(mux.channel(addr(2)).unwrap());

    let send_all = |channel: Arc<serialmux_mux::Channel>, fill: u8| async move {
        for i in 0..3u8 {
            channel
                .send(Bytes::from(vec![fill + i; 200]))
                .await
                .unwrap();
        }
    };
    tokio::join!(send_all(a, 0x10), send_all(b, 0x20));

    // 200 bytes is four frames: 62 + 62 + 62 + 14.
    let mut frames = Vec::new();
    while frames.len() < 24 {
        let wire = timeout(Duration::from_secs(2), remote.recv())
            .await
            .unwrap()
            .unwrap();
        for frame in decode_frames(&wire) {
            frames.push(frame.unwrap());
        }
    }

    for message in frames.chunks(4) {
        let address = message[0].address;
        let fill = message[0].payload[0];
        let lens: Vec<usize> = message.iter().map(|f| f.payload.len()).collect();
        assert_eq!(lens, vec![MAX_PAYLOAD, MAX_PAYLOAD, MAX_PAYLOAD, 14]);
        for frame in message {
            assert_eq!(frame.address, address, "frames of one message interleaved");
            assert!(frame.payload.iter().all(|&byte| byte == fill));
        }
    }

    mux.shutdown().await;
}

#[tokio::test]
async fn inbound_frames_reach_only_their_channel() {
    let (mux, remote) = start(Policy::Framed);
    let mut three = mux.channel(addr(3)).unwrap().subscribe();
    let mut four = mux.channel(addr(4)).unwrap().subscribe();

    remote.inject(&[3, 5, b'h', b'e', b'l', b'l', b'o']);
    let got = timeout(Duration::from_secs(2), three.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.as_ref(), b"hello");
    assert!(four.try_recv().is_none());

    let stats = mux.shutdown().await;
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.errors, 0);
}

#[tokio::test]
async fn raw_policy_has_one_passthrough_channel() {
    let (mux, mut remote) = start(Policy::Raw);
    assert_eq!(mux.channels().len(), 1);
    assert!(matches!(
        mux.channel(addr(2)),
        Err(MuxError::NoSuchChannel(2))
    ));

    let channel = Arc::clone(mux.channel(addr(1)).unwrap());
    let mut sub = channel.subscribe();

    channel.send(Bytes::from_static(b"AT\r")).await.unwrap();
    assert_eq!(remote.recv().await.unwrap().as_ref(), b"AT\r");

    remote.inject(b"OK\r\n");
    let got = timeout(Duration::from_secs(2), sub.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.as_ref(), b"OK\r\n");

    mux.shutdown().await;
}

#[tokio::test]
async fn sends_fail_after_shutdown() {
    let (mux, _remote) = start(Policy::Framed);
    let sender = mux.channel(addr(1)).unwrap().sender();
    mux.shutdown().await;

    let err = sender.send(Bytes::from_static(b"late")).await.unwrap_err();
    assert!(matches!(err, MuxError::Closed));
}
