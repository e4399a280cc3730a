//! Tests for the trailing-peer limit

use libp2p::PeerId;
use parking_lot::Mutex;
use protocore_config::SyncConfig;
use protocore_p2p::{DisconnectReason, EthPeer, EthPeers, PeerConnection};
use protocore_state_sync::{
    BlockAddedObserver, Blockchain, ChainEvents, SyncState, SyncTargetRequirements,
    TrailingPeerLimiter, TrailingPeerRequirements,
};
use protocore_types::{BlockAddedEvent, BlockHeader, H256};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct RecordingConnection {
    reasons: Mutex<Vec<DisconnectReason>>,
}

impl PeerConnection for RecordingConnection {
    fn disconnect(&self, reason: DisconnectReason) {
        self.reasons.lock().push(reason);
    }
}

struct TestChain(u64);

impl Blockchain for TestChain {
    fn chain_head_number(&self) -> u64 {
        self.0
    }

    fn chain_head_hash(&self) -> H256 {
        H256::keccak256(&self.0.to_be_bytes())
    }
}

fn add_peer(peers: &EthPeers, height: Option<u64>) -> Arc<RecordingConnection> {
    let connection = Arc::new(RecordingConnection::default());
    let peer = Arc::new(EthPeer::new(PeerId::random(), connection.clone()));
    if let Some(height) = height {
        peer.chain_state().update_height_estimate(height);
    }
    peers.register(peer).unwrap();
    connection
}

fn block(number: u64) -> BlockHeader {
    BlockHeader::new(number, H256::keccak256(&number.to_be_bytes()), H256::ZERO)
}

/// A limiter whose requirements supplier counts its calls
fn counting_limiter(
    peers: Arc<EthPeers>,
    requirements: TrailingPeerRequirements,
) -> (TrailingPeerLimiter, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let limiter = TrailingPeerLimiter::new(peers, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        requirements
    });
    (limiter, calls)
}

#[test]
fn test_unrestricted_disconnects_nobody() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let connections: Vec<_> = [1, 2, 3].into_iter().map(|h| add_peer(&peers, Some(h))).collect();
    let (limiter, _) = counting_limiter(
        peers,
        TrailingPeerRequirements::new(1_000, u64::MAX),
    );

    assert_eq!(limiter.enforce_trailing_peer_limit(), 0);
    assert!(connections.iter().all(|c| c.reasons.lock().is_empty()));
}

#[test]
fn test_disconnects_lowest_trailing_peers() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let at_5 = add_peer(&peers, Some(5));
    let at_10 = add_peer(&peers, Some(10));
    let at_15 = add_peer(&peers, Some(15));
    let unknown = add_peer(&peers, None);
    let (limiter, _) = counting_limiter(peers.clone(), TrailingPeerRequirements::new(20, 1));

    assert_eq!(limiter.enforce_trailing_peer_limit(), 2);

    assert_eq!(*at_5.reasons.lock(), vec![DisconnectReason::TooManyPeers]);
    assert_eq!(*at_10.reasons.lock(), vec![DisconnectReason::TooManyPeers]);
    assert!(at_15.reasons.lock().is_empty());
    assert!(unknown.reasons.lock().is_empty());
    assert_eq!(peers.available_peers().len(), 2);
}

#[test]
fn test_peers_at_minimum_are_not_trailing() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let connections: Vec<_> = [20, 25, 30].into_iter().map(|h| add_peer(&peers, Some(h))).collect();
    let (limiter, _) = counting_limiter(peers, TrailingPeerRequirements::new(20, 0));

    assert_eq!(limiter.enforce_trailing_peer_limit(), 0);
    assert!(connections.iter().all(|c| c.reasons.lock().is_empty()));
}

#[test]
fn test_within_limit_disconnects_nobody() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let low = add_peer(&peers, Some(1));
    let lower = add_peer(&peers, Some(0));
    let (limiter, _) = counting_limiter(peers, TrailingPeerRequirements::new(10, 2));

    assert_eq!(limiter.enforce_trailing_peer_limit(), 0);
    assert!(low.reasons.lock().is_empty());
    assert!(lower.reasons.lock().is_empty());
}

#[test]
fn test_requirements_are_read_on_every_check() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let at_5 = add_peer(&peers, Some(5));
    let max = Arc::new(AtomicU64::new(u64::MAX));
    let limiter = {
        let max = max.clone();
        TrailingPeerLimiter::new(peers, move || {
            TrailingPeerRequirements::new(10, max.load(Ordering::SeqCst))
        })
    };

    limiter.enforce_trailing_peer_limit();
    assert!(at_5.reasons.lock().is_empty());

    max.store(0, Ordering::SeqCst);
    limiter.enforce_trailing_peer_limit();
    assert_eq!(*at_5.reasons.lock(), vec![DisconnectReason::TooManyPeers]);
}

#[test]
fn test_checks_only_canonical_blocks_on_interval() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let (limiter, calls) = counting_limiter(peers, TrailingPeerRequirements::UNRESTRICTED);
    let chain = TestChain(0);

    limiter.on_block_added(&BlockAddedEvent::fork(block(100)), &chain);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    limiter.on_block_added(&BlockAddedEvent::head_advanced(block(99)), &chain);
    limiter.on_block_added(&BlockAddedEvent::head_advanced(block(101)), &chain);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    limiter.on_block_added(&BlockAddedEvent::head_advanced(block(100)), &chain);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    limiter.on_block_added(&BlockAddedEvent::head_advanced(block(0)), &chain);
    limiter.on_block_added(&BlockAddedEvent::head_advanced(block(300)), &chain);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_custom_recheck_interval() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let (limiter, calls) = counting_limiter(peers, TrailingPeerRequirements::UNRESTRICTED);
    let limiter = limiter.with_recheck_interval(5);
    let chain = TestChain(0);

    for number in 1..=20 {
        limiter.on_block_added(&BlockAddedEvent::head_advanced(block(number)), &chain);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(limiter.with_recheck_interval(0).recheck_interval(), 1);
}

#[test]
fn test_registered_limiter_follows_chain_events() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let (limiter, calls) = counting_limiter(peers, TrailingPeerRequirements::UNRESTRICTED);
    let events = Arc::new(ChainEvents::new());
    let chain = TestChain(100);

    let subscription = Arc::new(limiter).register(&events);
    assert_eq!(events.observer_count(), 1);
    events.publish(&BlockAddedEvent::head_advanced(block(100)), &chain);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    subscription.unsubscribe();
    assert_eq!(events.observer_count(), 0);
    events.publish(&BlockAddedEvent::head_advanced(block(200)), &chain);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsubscribe_unknown_observer() {
    let events = Arc::new(ChainEvents::new());
    let sync_state = Arc::new(SyncState::new(0));
    let id = events.subscribe(sync_state);

    assert!(events.unsubscribe(id));
    assert!(!events.unsubscribe(id));
}

#[test]
fn test_sync_state_follows_canonical_head() {
    let sync_state = SyncState::new(10);
    let chain = TestChain(0);

    sync_state.on_block_added(&BlockAddedEvent::fork(block(50)), &chain);
    assert_eq!(sync_state.chain_head_number(), 10);

    sync_state.on_block_added(&BlockAddedEvent::head_advanced(block(11)), &chain);
    assert_eq!(sync_state.chain_head_number(), 11);
}

#[test]
fn test_requirements_from_sync_target() {
    let sync_state = Arc::new(SyncState::new(500));
    let config = SyncConfig {
        max_trailing_peers: Some(3),
        trailing_peer_tolerance: 10,
        ..SyncConfig::default()
    };
    let calculator = SyncTargetRequirements::new(sync_state.clone(), &config);

    assert_eq!(calculator.calculate(), TrailingPeerRequirements::UNRESTRICTED);

    sync_state.set_sync_target(PeerId::random(), 1_000);
    assert_eq!(calculator.calculate(), TrailingPeerRequirements::new(990, 3));

    sync_state.update_target_height(1_200);
    assert_eq!(calculator.calculate(), TrailingPeerRequirements::new(1_190, 3));

    let chain = TestChain(0);
    sync_state.on_block_added(&BlockAddedEvent::head_advanced(block(1_195)), &chain);
    assert_eq!(calculator.calculate(), TrailingPeerRequirements::new(1_195, 3));

    sync_state.clear_sync_target();
    assert_eq!(calculator.calculate(), TrailingPeerRequirements::UNRESTRICTED);
}

#[test]
fn test_requirements_without_limit_are_unrestricted() {
    let sync_state = Arc::new(SyncState::new(0));
    sync_state.set_sync_target(PeerId::random(), 100);
    let supplier = SyncTargetRequirements::new(sync_state, &SyncConfig::default()).into_supplier();

    assert!(supplier().is_unrestricted());
}

#[test]
fn test_limiter_driven_by_sync_target() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let behind = add_peer(&peers, Some(100));
    let further_behind = add_peer(&peers, Some(50));
    let current = add_peer(&peers, Some(1_000));

    let sync_state = Arc::new(SyncState::new(0));
    sync_state.set_sync_target(PeerId::random(), 1_000);
    let config = SyncConfig {
        max_trailing_peers: Some(1),
        ..SyncConfig::default()
    };
    let limiter = TrailingPeerLimiter::new(
        peers,
        SyncTargetRequirements::new(sync_state, &config).into_supplier(),
    );

    assert_eq!(limiter.enforce_trailing_peer_limit(), 1);
    assert_eq!(*further_behind.reasons.lock(), vec![DisconnectReason::TooManyPeers]);
    assert!(behind.reasons.lock().is_empty());
    assert!(current.reasons.lock().is_empty());
}

#[test]
fn test_limiter_from_config_uses_configured_interval() {
    let peers = Arc::new(EthPeers::new(10, 1));
    let behind = add_peer(&peers, Some(10));
    let sync_state = Arc::new(SyncState::new(0));
    sync_state.set_sync_target(PeerId::random(), 500);
    let config = SyncConfig {
        max_trailing_peers: Some(0),
        trailing_peer_recheck_interval: 7,
        ..SyncConfig::default()
    };
    let limiter = TrailingPeerLimiter::for_sync_target(peers, sync_state, &config);
    let chain = TestChain(0);
    assert_eq!(limiter.recheck_interval(), 7);

    limiter.on_block_added(&BlockAddedEvent::head_advanced(block(100)), &chain);
    assert!(behind.reasons.lock().is_empty());

    limiter.on_block_added(&BlockAddedEvent::head_advanced(block(105)), &chain);
    assert_eq!(*behind.reasons.lock(), vec![DisconnectReason::TooManyPeers]);
}
