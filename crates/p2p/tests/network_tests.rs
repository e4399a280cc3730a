//! Tests for the network handle and disconnect reasons.

use libp2p::PeerId;
use protocore_p2p::{Command, DisconnectReason, NetworkHandle};
use tokio::sync::mpsc;

#[test]
fn test_disconnect_reason_codes() {
    assert_eq!(DisconnectReason::TooManyPeers.code(), 0x04);
    assert_eq!(DisconnectReason::BreachOfProtocol.code(), 0x02);
    assert_eq!(
        DisconnectReason::from_code(0x04),
        Some(DisconnectReason::TooManyPeers)
    );
    assert_eq!(DisconnectReason::from_code(0x07), None);
    assert_eq!(
        DisconnectReason::TooManyPeers.to_string(),
        "TOO_MANY_PEERS (0x04)"
    );
}

#[tokio::test]
async fn test_network_handle_disconnect() {
    let (tx, mut rx) = mpsc::channel(10);
    let handle = NetworkHandle::new(tx);
    let peer_id = PeerId::random();

    handle
        .disconnect(peer_id, DisconnectReason::UselessPeer)
        .await
        .unwrap();
    assert_eq!(
        rx.recv().await,
        Some(Command::Disconnect(peer_id, DisconnectReason::UselessPeer))
    );

    handle.shutdown().await.unwrap();
    assert_eq!(rx.recv().await, Some(Command::Shutdown));
}

#[tokio::test]
async fn test_connection_does_not_block_when_channel_full() {
    let (tx, mut rx) = mpsc::channel(1);
    let handle = NetworkHandle::new(tx);
    let first = PeerId::random();
    let second = PeerId::random();

    handle.connection(first).disconnect(DisconnectReason::TooManyPeers);
    // Channel is full; the second request is dropped rather than blocking
    handle.connection(second).disconnect(DisconnectReason::TooManyPeers);
    assert!(handle
        .try_disconnect(second, DisconnectReason::TooManyPeers)
        .is_err());

    assert_eq!(
        rx.recv().await,
        Some(Command::Disconnect(first, DisconnectReason::TooManyPeers))
    );
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_closed_channel_reports_error() {
    let (tx, rx) = mpsc::channel(1);
    let handle = NetworkHandle::new(tx);
    drop(rx);
    assert!(handle.shutdown().await.is_err());
}
