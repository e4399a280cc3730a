//! # Proto Core Types
//!
//! Primitive types shared by the world-state synchronization crates.
//!
//! - [`H256`] - 32-byte Keccak-256 digests used as trie node keys
//! - [`BlockHeader`] and [`BlockAddedEvent`] - the slice of chain data the
//!   downloader and peer policies react to
//! - [`StateTrieAccountValue`] - the RLP payload stored at account-trie leaves
//!
//! ## Example
//!
//! ```rust
//! use protocore_types::{H256, EMPTY_TRIE_ROOT};
//!
//! // The root of an empty trie is the hash of the RLP empty string
//! assert_eq!(H256::keccak256(&[0x80]), EMPTY_TRIE_ROOT);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod account;
pub mod block;
pub mod hash;

// Re-export main types at crate root
pub use account::StateTrieAccountValue;
pub use block::{BlockAddedEvent, BlockHeader};
pub use hash::{H256, EMPTY_CODE_HASH, EMPTY_TRIE_ROOT, HASH_SIZE};

/// Result type alias for Proto Core types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Proto Core types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid hash format
    #[error("invalid hash format: {0}")]
    InvalidHash(String),

    /// Malformed account leaf value
    #[error("invalid account value: {0}")]
    InvalidAccount(String),

    /// RLP decoding error
    #[error("RLP decode error: {0}")]
    RlpDecode(#[from] rlp::DecoderError),
}
