//! Limit on peers that trail far behind the chain.
//!
//! Peers whose chains are behind the height we need are of little use while
//! syncing but still take connection slots. [`TrailingPeerLimiter`] keeps at
//! most a configured number of them, dropping the furthest behind first.

use protocore_config::SyncConfig;
use protocore_p2p::{DisconnectReason, EthPeers};
use protocore_types::BlockAddedEvent;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::chain_events::{BlockAddedObserver, Blockchain, ChainEvents, ObserverSubscription};
use crate::sync_state::{SyncState, SyncTargetRequirements};

/// Default number of blocks between trailing-peer checks
pub const DEFAULT_RECHECK_INTERVAL: u64 = 100;

/// How far behind a peer may be, and how many such peers to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrailingPeerRequirements {
    /// Peers with a known height below this are trailing
    pub minimum_height_to_be_up_to_date: u64,
    /// Trailing peers to keep. `u64::MAX` means no limit.
    pub max_trailing_peers: u64,
}

impl TrailingPeerRequirements {
    /// No limit on trailing peers
    pub const UNRESTRICTED: Self = Self {
        minimum_height_to_be_up_to_date: 0,
        max_trailing_peers: u64::MAX,
    };

    /// Create requirements
    pub fn new(minimum_height_to_be_up_to_date: u64, max_trailing_peers: u64) -> Self {
        Self {
            minimum_height_to_be_up_to_date,
            max_trailing_peers,
        }
    }

    /// Whether any number of trailing peers is allowed
    pub fn is_unrestricted(&self) -> bool {
        self.max_trailing_peers == u64::MAX
    }
}

impl fmt::Display for TrailingPeerRequirements {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unrestricted() {
            write!(f, "unrestricted")
        } else {
            write!(
                f,
                "at most {} peers below height {}",
                self.max_trailing_peers, self.minimum_height_to_be_up_to_date
            )
        }
    }
}

type RequirementsSupplier = Box<dyn Fn() -> TrailingPeerRequirements + Send + Sync>;

/// Disconnects the excess of peers trailing behind the required height.
pub struct TrailingPeerLimiter {
    eth_peers: Arc<EthPeers>,
    requirements: RequirementsSupplier,
    recheck_interval: u64,
}

impl TrailingPeerLimiter {
    /// Create a limiter over `eth_peers`. `requirements` is asked afresh on
    /// every check.
    pub fn new<F>(eth_peers: Arc<EthPeers>, requirements: F) -> Self
    where
        F: Fn() -> TrailingPeerRequirements + Send + Sync + 'static,
    {
        Self {
            eth_peers,
            requirements: Box::new(requirements),
            recheck_interval: DEFAULT_RECHECK_INTERVAL,
        }
    }

    /// Limiter driven by the current sync target, checking on the interval
    /// set in `config`
    pub fn for_sync_target(
        eth_peers: Arc<EthPeers>,
        sync_state: Arc<SyncState>,
        config: &SyncConfig,
    ) -> Self {
        let requirements = SyncTargetRequirements::new(sync_state, config).into_supplier();
        Self::new(eth_peers, requirements)
            .with_recheck_interval(config.trailing_peer_recheck_interval)
    }

    /// Check on every `interval`-th canonical block. Zero is treated as one.
    pub fn with_recheck_interval(mut self, interval: u64) -> Self {
        self.recheck_interval = interval.max(1);
        self
    }

    /// Blocks between checks
    pub fn recheck_interval(&self) -> u64 {
        self.recheck_interval
    }

    /// Subscribe the limiter to `events`. It stays subscribed until the
    /// returned guard is dropped.
    pub fn register(self: Arc<Self>, events: &Arc<ChainEvents>) -> ObserverSubscription {
        ObserverSubscription::new(events, self)
    }

    /// Disconnect trailing peers, lowest first, until no more than the allowed
    /// number remain. Peers with unknown height are never counted. Returns the
    /// number of peers disconnected.
    pub fn enforce_trailing_peer_limit(&self) -> usize {
        let requirements = (self.requirements)();
        if requirements.is_unrestricted() {
            return 0;
        }

        let minimum = requirements.minimum_height_to_be_up_to_date;
        let mut trailing: Vec<_> = self
            .eth_peers
            .available_peers()
            .into_iter()
            .filter_map(|peer| {
                let height = peer.chain_state().estimated_height()?;
                (height < minimum).then_some((height, peer))
            })
            .collect();
        trailing.sort_by_key(|(height, _)| *height);

        let excess = (trailing.len() as u64).saturating_sub(requirements.max_trailing_peers) as usize;
        trace!(
            %requirements,
            trailing = trailing.len(),
            excess,
            "Checking trailing peers"
        );
        for (_, peer) in trailing.into_iter().take(excess) {
            debug!(
                peer = %peer,
                "Enforcing trailing peers limit by disconnecting peer"
            );
            peer.disconnect(DisconnectReason::TooManyPeers);
        }
        excess
    }
}

impl BlockAddedObserver for TrailingPeerLimiter {
    fn on_block_added(&self, event: &BlockAddedEvent, _chain: &dyn Blockchain) {
        if event.is_new_canonical_head() && event.block_number() % self.recheck_interval == 0 {
            self.enforce_trailing_peer_limit();
        }
    }
}
