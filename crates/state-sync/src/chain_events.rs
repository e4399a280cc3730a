//! Block-added notifications.
//!
//! The chain publishes a [`BlockAddedEvent`] for every imported block;
//! interested components subscribe a [`BlockAddedObserver`].

use parking_lot::RwLock;
use protocore_types::{BlockAddedEvent, H256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

/// Read-only view of the local chain.
pub trait Blockchain: Send + Sync {
    /// Number of the canonical head
    fn chain_head_number(&self) -> u64;

    /// Hash of the canonical head
    fn chain_head_hash(&self) -> H256;
}

/// Receives block-added events.
pub trait BlockAddedObserver: Send + Sync {
    /// Called on the publishing thread after a block is added
    fn on_block_added(&self, event: &BlockAddedEvent, chain: &dyn Blockchain);
}

/// Identifies one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Observer registry for block-added events.
#[derive(Default)]
pub struct ChainEvents {
    observers: RwLock<Vec<(ObserverId, Arc<dyn BlockAddedObserver>)>>,
    next_id: AtomicU64,
}

impl ChainEvents {
    /// Registry with no observers
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn subscribe(&self, observer: Arc<dyn BlockAddedObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Remove an observer. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Number of subscribed observers
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Deliver `event` to every observer, in subscription order
    pub fn publish(&self, event: &BlockAddedEvent, chain: &dyn Blockchain) {
        let observers: Vec<_> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        trace!(
            block = event.block_number(),
            observers = observers.len(),
            "Publishing block added event"
        );
        for observer in observers {
            observer.on_block_added(event, chain);
        }
    }
}

/// Unsubscribes its observer when dropped.
pub struct ObserverSubscription {
    events: Weak<ChainEvents>,
    id: ObserverId,
}

impl ObserverSubscription {
    /// Subscribe `observer` to `events` for the lifetime of the returned guard
    pub fn new(events: &Arc<ChainEvents>, observer: Arc<dyn BlockAddedObserver>) -> Self {
        let id = events.subscribe(observer);
        Self {
            events: Arc::downgrade(events),
            id,
        }
    }

    /// Id of the subscription
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Unsubscribe now
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for ObserverSubscription {
    fn drop(&mut self) {
        if let Some(events) = self.events.upgrade() {
            events.unsubscribe(self.id);
        }
    }
}
