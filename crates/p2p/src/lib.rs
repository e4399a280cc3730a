//! # Proto Core P2P
//!
//! Peer bookkeeping for the Proto Core sync pipeline.
//!
//! This crate provides:
//! - **EthPeers** - registry of connected peers with chain-height estimates
//! - **EthPeer** - a single peer: its [`ChainState`], outstanding requests and a
//!   handle for asking the network layer to drop it
//! - **NetworkHandle** - command channel into the network service
//!
//! Transport, handshakes and message framing live in the network service; this
//! crate only tracks what sync needs to know about each peer.
//!
//! ## Example
//!
//! ```rust
//! use libp2p::PeerId;
//! use protocore_p2p::{EthPeer, EthPeers, NetworkHandle};
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! let (command_tx, _command_rx) = mpsc::channel(64);
//! let handle = NetworkHandle::new(command_tx);
//! let peers = EthPeers::new(25, 4);
//!
//! let peer_id = PeerId::random();
//! let peer = Arc::new(EthPeer::new(peer_id, handle.connection(peer_id)));
//! peer.chain_state().update_height_estimate(1_000);
//! peers.register(peer).unwrap();
//!
//! assert_eq!(peers.best_peer().map(|p| p.peer_id()), Some(peer_id));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod network;
pub mod peers;

// Re-export main types at crate root
pub use network::{Command, DisconnectReason, NetworkHandle, PeerConnection};
pub use peers::{ChainState, EthPeer, EthPeers, RequestGuard};

/// Result type alias for network operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the P2P networking layer
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Channel send error
    #[error("channel error: {0}")]
    Channel(String),

    /// Peer not found
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Maximum peer limit reached
    #[error("maximum peer limit reached")]
    MaxPeersReached,
}
