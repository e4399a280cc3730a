//! # Proto Core State Sync
//!
//! Downloads the world state of a block from peers and keeps the peer set
//! useful while doing so.
//!
//! ## Overview
//!
//! The world state is a Merkle Patricia Trie of accounts, each of which may
//! point at contract code and a storage trie of its own. Every node is stored
//! under the Keccak256 hash of its encoding, so a download starts from the
//! block's state root and walks down: each node that arrives names the hashes
//! of its children, which are requested in turn.
//!
//! ## Key Components
//!
//! - **[`NodeDataRequest`]**: one node to fetch. Verifies that supplied bytes
//!   hash to the requested hash and derives the child requests.
//!
//! - **[`WorldDownloadState`]**: the task queue and completion logic of one
//!   download. Requests beyond the task capacity are spilled to a
//!   request store, and downloaded nodes are buffered and written in batches.
//!
//! - **[`CompleteTaskStep`]**: buffers a returned node and enqueues its
//!   children, or fails the task so it is retried.
//!
//! - **[`WorldStateDownloader`]**: spawns the workers that move tasks from the
//!   queue to peers and back.
//!
//! - **[`TrailingPeerLimiter`]**: disconnects the excess of peers whose chains
//!   are too far behind.
//!
//! ## Root Node Last
//!
//! The root node of the target trie is held back until every other node is
//! resolved, then written together with any still-buffered nodes and the
//! latest-world-state marker in a single commit. A stored
//! root therefore always means a complete trie, and an interrupted download
//! never looks finished.
//!
//! ## Example
//!
//! ```rust,ignore
//! use protocore_state_sync::WorldStateDownloader;
//!
//! let downloader = WorldStateDownloader::new(network, eth_peers, storage, config.sync);
//! let handle = downloader.run(header).await?;
//! handle.wait().await?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod chain_events;
pub mod complete_task;
pub mod download_state;
pub mod downloader;
pub mod error;
pub mod node_data_request;
pub mod sync_state;
pub mod task;
pub mod trailing_peers;

// Re-export main types at crate root
pub use chain_events::{
    BlockAddedObserver, Blockchain, ChainEvents, ObserverId, ObserverSubscription,
};
pub use complete_task::CompleteTaskStep;
pub use download_state::{
    DownloadProgress, DownloadState, DownloadStatus, WorldDownloadState,
};
pub use downloader::{NodeDataNetwork, WorldDownloadHandle, WorldStateDownloader};
pub use error::{NodeDataError, WorldStateSyncError};
pub use node_data_request::{NodeDataRequest, RequestKind};
pub use sync_state::{SyncState, SyncTarget, SyncTargetRequirements};
pub use task::{InMemoryTaskQueue, QueuedTask, StandaloneTask, Task};
pub use trailing_peers::{TrailingPeerLimiter, TrailingPeerRequirements};

/// Result type for world-state sync operations
pub type Result<T> = std::result::Result<T, WorldStateSyncError>;
