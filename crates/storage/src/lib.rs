//! Proto Core Storage Layer
//!
//! This crate provides the world-state storage used by state synchronization:
//!
//! - **Database**: RocksDB wrapper with column families for account trie nodes,
//!   storage trie nodes, contract code and metadata
//! - **World state**: [`WorldStateStorage`] / [`WorldStateUpdater`] traits with
//!   in-memory and RocksDB-backed implementations
//! - **Request stores**: FIFO spill space for download requests that do not
//!   fit in memory
//! - **Trie nodes**: decoding of Merkle Patricia Trie nodes and discovery of the
//!   nodes and values they reference

#![deny(missing_docs)]
#![deny(unsafe_code)]

pub mod db;
pub mod request_store;
pub mod rocks;
pub mod trie;
pub mod world_state;

// Re-exports for convenience
pub use db::{Column, Database, DatabaseConfig, WriteBatch};
pub use request_store::{InMemoryRequestStore, RequestStore, RocksRequestStore};
pub use rocks::RocksWorldStateStorage;
pub use trie::{Nibbles, NodeRef, TrieNode, TrieReference};
pub use world_state::{InMemoryWorldStateStorage, WorldStateStorage, WorldStateUpdater};

use thiserror::Error;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Stored bytes could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Trie node is malformed
    #[error("Trie error: {0}")]
    Trie(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rlp::DecoderError> for StorageError {
    fn from(err: rlp::DecoderError) -> Self {
        StorageError::Trie(err.to_string())
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;
