//! Local chain head and the peer we are syncing towards.

use libp2p::PeerId;
use parking_lot::RwLock;
use protocore_config::SyncConfig;
use protocore_types::BlockAddedEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::chain_events::{BlockAddedObserver, Blockchain};
use crate::trailing_peers::TrailingPeerRequirements;

/// The peer whose chain we are catching up with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTarget {
    /// Peer serving the target chain
    pub peer_id: PeerId,
    /// Best known height of the target chain
    pub height: u64,
}

/// Where the local chain is and where it is going.
#[derive(Debug, Default)]
pub struct SyncState {
    chain_head: AtomicU64,
    target: RwLock<Option<SyncTarget>>,
}

impl SyncState {
    /// State with the local head at `chain_head` and no target
    pub fn new(chain_head: u64) -> Self {
        Self {
            chain_head: AtomicU64::new(chain_head),
            target: RwLock::new(None),
        }
    }

    /// Number of the local canonical head
    pub fn chain_head_number(&self) -> u64 {
        self.chain_head.load(Ordering::SeqCst)
    }

    /// Start syncing towards `peer_id`'s chain
    pub fn set_sync_target(&self, peer_id: PeerId, height: u64) {
        info!(peer = %peer_id, height, "Sync target selected");
        *self.target.write() = Some(SyncTarget { peer_id, height });
    }

    /// Raise the target height after the target peer announced more blocks
    pub fn update_target_height(&self, height: u64) {
        if let Some(target) = self.target.write().as_mut() {
            target.height = target.height.max(height);
        }
    }

    /// Stop syncing towards any peer
    pub fn clear_sync_target(&self) {
        if self.target.write().take().is_some() {
            debug!("Sync target cleared");
        }
    }

    /// Current target, if any
    pub fn sync_target(&self) -> Option<SyncTarget> {
        *self.target.read()
    }
}

impl BlockAddedObserver for SyncState {
    fn on_block_added(&self, event: &BlockAddedEvent, _chain: &dyn Blockchain) {
        if event.is_new_canonical_head() {
            self.chain_head.store(event.block_number(), Ordering::SeqCst);
        }
    }
}

/// Trailing-peer requirements derived from the sync target.
#[derive(Debug, Clone)]
pub struct SyncTargetRequirements {
    sync_state: Arc<SyncState>,
    max_trailing_peers: Option<u64>,
    trailing_peer_tolerance: u64,
}

impl SyncTargetRequirements {
    /// Calculator using the trailing-peer settings in `config`
    pub fn new(sync_state: Arc<SyncState>, config: &SyncConfig) -> Self {
        Self {
            sync_state,
            max_trailing_peers: config.max_trailing_peers,
            trailing_peer_tolerance: config.trailing_peer_tolerance,
        }
    }

    /// Unrestricted without a limit or a target. Otherwise a peer trails when
    /// it is below our own head or below the target height less the tolerance.
    pub fn calculate(&self) -> TrailingPeerRequirements {
        let (Some(max_trailing_peers), Some(target)) =
            (self.max_trailing_peers, self.sync_state.sync_target())
        else {
            return TrailingPeerRequirements::UNRESTRICTED;
        };

        let minimum = self
            .sync_state
            .chain_head_number()
            .max(target.height.saturating_sub(self.trailing_peer_tolerance));
        TrailingPeerRequirements::new(minimum, max_trailing_peers)
    }

    /// The calculator as a supplier for
    /// [`TrailingPeerLimiter::new`](crate::TrailingPeerLimiter::new)
    pub fn into_supplier(self) -> impl Fn() -> TrailingPeerRequirements + Send + Sync + 'static {
        move || self.calculate()
    }
}
