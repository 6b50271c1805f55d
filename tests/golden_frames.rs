//! End-to-end wire-format checks: build a node against a local UDP
//! listener, change a channel, and verify the bytes that actually leave
//! the node match each protocol's frame layout.

use std::time::Duration;

use dmx_engine::{ArtNetNode, ByteOrder, DmxError, KiNetNode, SacnNode};

async fn local_listener() -> tokio::net::UdpSocket {
    tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap()
}

async fn recv_one(listener: &tokio::net::UdpSocket) -> Vec<u8> {
    let mut buf = vec![0u8; 600];
    let (n, _) = tokio::time::timeout(Duration::from_secs(2), listener.recv_from(&mut buf))
        .await
        .expect("timed out waiting for a frame")
        .unwrap();
    buf.truncate(n);
    buf
}

#[tokio::test(flavor = "current_thread")]
async fn artnet_frame_carries_channel_value() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let listener = local_listener().await;
            let addr = listener.local_addr().unwrap();
            let node = ArtNetNode::new(&addr.ip().to_string(), addr.port());
            let universe = node.add_universe(3).unwrap();
            let channel = universe.add_channel(1, 1, "dimmer", 1, ByteOrder::Little).unwrap();
            channel.set_values(&[200.0]).unwrap();
            // Refresh task starts automatically (`start_refresh_task` defaults to `true`).

            let frame = recv_one(&listener).await;
            assert_eq!(&frame[0..8], b"Art-Net\0");
            assert_eq!(u16::from_le_bytes([frame[8], frame[9]]), 0x5000);
            assert_eq!(frame[10], 0);
            assert_eq!(frame[11], 14);
            assert_eq!(frame[14], 3); // SubUni
            assert_eq!(frame[15], 0); // Net
            // A 1-byte channel still forces the universe buffer to its even-length
            // minimum of 2 bytes (src/universe.rs `ensure_buffer_len`).
            assert_eq!(&frame[18..], &[200, 0]);
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn sacn_frame_carries_channel_value() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let listener = local_listener().await;
            let addr = listener.local_addr().unwrap();
            let node = SacnNode::new(&addr.ip().to_string(), addr.port(), "bench-source");
            let universe = node.add_universe(7).unwrap();
            let channel = universe.add_channel(1, 1, "dimmer", 1, ByteOrder::Little).unwrap();
            channel.set_values(&[42.0]).unwrap();
            // Refresh task starts automatically (`start_refresh_task` defaults to `true`).

            let frame = recv_one(&listener).await;
            assert_eq!(&frame[4..16], b"ASC-E1.17\0\0\0");
            // Root layer (38 bytes) + framing layer up to Universe (75 bytes).
            let universe_pos = 38 + 75;
            assert_eq!(u16::from_be_bytes([frame[universe_pos], frame[universe_pos + 1]]), 7);
            // A 1-byte channel still forces the universe buffer to its even-length
            // minimum of 2 bytes, so the DMX tail is [start_code, 42, 0].
            assert_eq!(frame[frame.len() - 3], 0); // DMX start code
            assert_eq!(frame[frame.len() - 2], 42); // single DMX slot
            assert_eq!(frame[frame.len() - 1], 0); // buffer padding slot
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn kinet_frame_carries_channel_value() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let listener = local_listener().await;
            let addr = listener.local_addr().unwrap();
            let node = KiNetNode::new(&addr.ip().to_string(), addr.port());
            let universe = node.add_universe(5).unwrap();
            let channel = universe.add_channel(1, 1, "dimmer", 1, ByteOrder::Little).unwrap();
            channel.set_values(&[77.0]).unwrap();
            // Refresh task starts automatically (`start_refresh_task` defaults to `true`).

            let frame = recv_one(&listener).await;
            // A 1-byte channel still forces the universe buffer to its even-length
            // minimum of 2 bytes, so the slot count is 2, not 1.
            assert_eq!(frame.len(), 20 + 1 + 2);
            assert_eq!(u32::from_be_bytes(frame[0..4].try_into().unwrap()), 0x0401_dc4a);
            assert_eq!(frame[20], 2); // slot count
            assert_eq!(frame[21], 77);
            assert_eq!(frame[22], 0); // buffer padding slot
        })
        .await;
}

#[test]
fn add_channel_overlap_is_rejected_before_mutation() {
    let node = ArtNetNode::new("127.0.0.1", 0x1936);
    let universe = node.add_universe(0).unwrap();
    universe.add_channel(1, 3, "rgb", 1, ByteOrder::Little).unwrap();

    let err = universe.add_channel(2, 1, "overlap", 1, ByteOrder::Little).unwrap_err();
    assert!(matches!(err, DmxError::OverlappingChannel(_)));
    // The rejected channel must not have been registered.
    assert!(universe.get_channel("overlap").is_err());
    assert_eq!(universe.len(), 1);
}

#[test]
fn output_correction_resolves_channel_then_universe_then_node() {
    let node = ArtNetNode::new("127.0.0.1", 0x1936);
    let universe = node.add_universe(0).unwrap();
    let channel = universe.add_channel(1, 1, "dimmer", 1, ByteOrder::Little).unwrap();

    node.set_output_correction(Some(dmx_engine::quadratic));
    channel.set_values(&[128.0]).unwrap();
    assert_eq!(channel.get_values(), vec![128]);
    // Corrected output lives in the universe buffer, not `get_values`.
    let buffer = universe.buffer_snapshot();
    assert_eq!(buffer[0], (dmx_engine::quadratic(128.0, 255).round()) as u8);

    universe.set_output_correction(Some(dmx_engine::linear));
    channel.set_values(&[128.0]).unwrap();
    assert_eq!(universe.buffer_snapshot()[0], 128);

    channel.set_output_correction(Some(dmx_engine::cubic));
    channel.set_values(&[128.0]).unwrap();
    assert_eq!(
        universe.buffer_snapshot()[0],
        (dmx_engine::cubic(128.0, 255).round()) as u8
    );
}
