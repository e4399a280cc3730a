//! Error types for world-state download

use protocore_storage::StorageError;
use protocore_types::H256;
use thiserror::Error;

/// Problems with a single node data request
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NodeDataError {
    /// Bytes offered for a request do not hash to the requested hash
    #[error("data hashes to {actual}, expected {expected}")]
    HashMismatch {
        /// Hash the request was created for
        expected: H256,
        /// Keccak256 of the offered bytes
        actual: H256,
    },

    /// Node bytes are not a valid trie node or account value
    #[error("failed to decode node {hash}: {reason}")]
    Decode {
        /// Hash of the node
        hash: H256,
        /// What the decoder rejected
        reason: String,
    },

    /// The request has no data attached yet
    #[error("no data for request {0}")]
    MissingData(H256),

    /// Serialized request bytes are malformed
    #[error("invalid serialized request: {0}")]
    InvalidEncoding(String),

    /// Reading or writing local storage failed
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for NodeDataError {
    fn from(err: StorageError) -> Self {
        NodeDataError::Storage(err.to_string())
    }
}

/// Why a world-state download session ended without success
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorldStateSyncError {
    /// Too many requests in a row returned nothing useful
    #[error("world state download stalled after {requests} requests without progress")]
    Stalled {
        /// Consecutive requests that made no progress
        requests: u64,
    },

    /// Local storage failed
    #[error("storage error: {0}")]
    Storage(String),

    /// The sync settings cannot drive a download
    #[error("invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// The session was cancelled before it finished
    #[error("world state download cancelled")]
    Cancelled,

    /// A worker ended unexpectedly
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for WorldStateSyncError {
    fn from(err: StorageError) -> Self {
        WorldStateSyncError::Storage(err.to_string())
    }
}

impl From<NodeDataError> for WorldStateSyncError {
    fn from(err: NodeDataError) -> Self {
        match err {
            NodeDataError::Storage(msg) => WorldStateSyncError::Storage(msg),
            other => WorldStateSyncError::Internal(other.to_string()),
        }
    }
}
