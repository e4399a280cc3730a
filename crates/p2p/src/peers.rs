//! Connected peers and what we know about their chains.

use crate::network::{DisconnectReason, PeerConnection};
use crate::{Error, Result};
use libp2p::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Our view of a peer's chain.
#[derive(Debug, Default)]
pub struct ChainState {
    estimated_height: RwLock<Option<u64>>,
}

impl ChainState {
    /// State with no height estimate yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the peer has told us anything about its height
    pub fn has_estimated_height(&self) -> bool {
        self.estimated_height.read().is_some()
    }

    /// Best known height of the peer's chain, if any
    pub fn estimated_height(&self) -> Option<u64> {
        *self.estimated_height.read()
    }

    /// Record that the peer has at least `height` blocks. Estimates never decrease.
    pub fn update_height_estimate(&self, height: u64) {
        let mut estimate = self.estimated_height.write();
        if estimate.map_or(true, |current| height > current) {
            *estimate = Some(height);
        }
    }
}

/// A connected peer.
pub struct EthPeer {
    peer_id: PeerId,
    chain_state: ChainState,
    connection: Arc<dyn PeerConnection>,
    disconnected: AtomicBool,
    outstanding_requests: Arc<AtomicUsize>,
}

impl EthPeer {
    /// Create a peer reachable through `connection`
    pub fn new(peer_id: PeerId, connection: Arc<dyn PeerConnection>) -> Self {
        Self {
            peer_id,
            chain_state: ChainState::new(),
            connection,
            disconnected: AtomicBool::new(false),
            outstanding_requests: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The peer's identity
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// What we know about the peer's chain
    pub fn chain_state(&self) -> &ChainState {
        &self.chain_state
    }

    /// Ask the network layer to drop this peer. Only the first call has any effect.
    pub fn disconnect(&self, reason: DisconnectReason) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(peer = %self.peer_id, %reason, "Disconnecting peer");
        self.connection.disconnect(reason);
    }

    /// Whether a disconnect has been requested
    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Requests sent to this peer that have not completed
    pub fn outstanding_requests(&self) -> usize {
        self.outstanding_requests.load(Ordering::SeqCst)
    }

    /// Count a request against this peer until the guard is dropped
    pub fn begin_request(&self) -> RequestGuard {
        self.outstanding_requests.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            counter: Arc::clone(&self.outstanding_requests),
        }
    }
}

impl fmt::Debug for EthPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EthPeer")
            .field("peer_id", &self.peer_id)
            .field("estimated_height", &self.chain_state.estimated_height())
            .field("disconnected", &self.is_disconnected())
            .finish()
    }
}

impl fmt::Display for EthPeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chain_state.estimated_height() {
            Some(height) => write!(f, "{} (height {})", self.peer_id, height),
            None => write!(f, "{} (height unknown)", self.peer_id),
        }
    }
}

/// Marks one in-flight request to a peer.
pub struct RequestGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Registry of connected peers.
pub struct EthPeers {
    peers: RwLock<HashMap<PeerId, Arc<EthPeer>>>,
    max_peers: usize,
    max_requests_per_peer: usize,
}

impl EthPeers {
    /// Create a registry holding at most `max_peers` peers, each of which may
    /// have `max_requests_per_peer` requests in flight before it stops being idle
    pub fn new(max_peers: usize, max_requests_per_peer: usize) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            max_peers,
            max_requests_per_peer,
        }
    }

    /// Add a peer, replacing any previous entry for the same id
    pub fn register(&self, peer: Arc<EthPeer>) -> Result<()> {
        let mut peers = self.peers.write();
        if !peers.contains_key(&peer.peer_id()) && peers.len() >= self.max_peers {
            return Err(Error::MaxPeersReached);
        }
        info!(peer = %peer.peer_id(), total = peers.len() + 1, "Peer registered");
        peers.insert(peer.peer_id(), peer);
        Ok(())
    }

    /// Remove a peer after its connection closed
    pub fn unregister(&self, peer_id: &PeerId) -> Result<Arc<EthPeer>> {
        let peer = self
            .peers
            .write()
            .remove(peer_id)
            .ok_or_else(|| Error::PeerNotFound(peer_id.to_string()))?;
        debug!(peer = %peer_id, "Peer unregistered");
        Ok(peer)
    }

    /// Look up a peer
    pub fn get(&self, peer_id: &PeerId) -> Option<Arc<EthPeer>> {
        self.peers.read().get(peer_id).cloned()
    }

    /// Number of registered peers, including ones being disconnected
    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Snapshot of peers that are not being disconnected
    pub fn available_peers(&self) -> Vec<Arc<EthPeer>> {
        self.peers
            .read()
            .values()
            .filter(|peer| !peer.is_disconnected())
            .cloned()
            .collect()
    }

    /// An available peer with spare request capacity whose chain reaches
    /// `min_height`, preferring the least busy and then the highest
    pub fn idle_peer(&self, min_height: u64) -> Option<Arc<EthPeer>> {
        self.available_peers()
            .into_iter()
            .filter(|peer| peer.outstanding_requests() < self.max_requests_per_peer)
            .filter(|peer| {
                peer.chain_state()
                    .estimated_height()
                    .is_some_and(|height| height >= min_height)
            })
            .min_by_key(|peer| {
                (
                    peer.outstanding_requests(),
                    std::cmp::Reverse(peer.chain_state().estimated_height()),
                )
            })
    }

    /// The available peer with the highest known chain
    pub fn best_peer(&self) -> Option<Arc<EthPeer>> {
        self.available_peers()
            .into_iter()
            .filter(|peer| peer.chain_state().has_estimated_height())
            .max_by_key(|peer| peer.chain_state().estimated_height())
    }
}
