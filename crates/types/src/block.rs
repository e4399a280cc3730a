//! Block header and chain events.
//!
//! The sync crates only need the parts of a header that identify a block and
//! commit to its world state, so [`BlockHeader`] carries just those fields.

use crate::{Error, Result, H256};
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use serde::{Deserialize, Serialize};

/// A block header as seen by world-state synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Hash of the parent block (zero for genesis)
    pub parent_hash: H256,
    /// Block number (genesis is 0)
    pub number: u64,
    /// Root of the world-state trie after executing this block
    pub state_root: H256,
    /// Unix timestamp in seconds
    pub timestamp: u64,
}

impl BlockHeader {
    /// Creates a header for `number` committing to `state_root`.
    pub fn new(number: u64, parent_hash: H256, state_root: H256) -> Self {
        Self {
            parent_hash,
            number,
            state_root,
            timestamp: 0,
        }
    }

    /// Computes the hash of this block header.
    ///
    /// The hash is the Keccak256 of the RLP-encoded header.
    pub fn hash(&self) -> H256 {
        H256::keccak256(&rlp::encode(self))
    }

    /// Decodes a header from RLP bytes.
    pub fn rlp_decode(data: &[u8]) -> Result<Self> {
        rlp::decode(data).map_err(Error::RlpDecode)
    }
}

impl Encodable for BlockHeader {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.append(&self.parent_hash);
        s.append(&self.number);
        s.append(&self.state_root);
        s.append(&self.timestamp);
    }
}

impl Decodable for BlockHeader {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 4 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        Ok(Self {
            parent_hash: rlp.val_at(0)?,
            number: rlp.val_at(1)?,
            state_root: rlp.val_at(2)?,
            timestamp: rlp.val_at(3)?,
        })
    }
}

/// Notification published when a block is appended to the local chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockAddedEvent {
    /// Header of the added block
    pub header: BlockHeader,
    /// Whether the block became the new canonical head
    pub is_new_canonical_head: bool,
}

impl BlockAddedEvent {
    /// Event for a block that extends the canonical chain.
    pub fn head_advanced(header: BlockHeader) -> Self {
        Self {
            header,
            is_new_canonical_head: true,
        }
    }

    /// Event for a block imported onto a side chain.
    pub fn fork(header: BlockHeader) -> Self {
        Self {
            header,
            is_new_canonical_head: false,
        }
    }

    /// Whether the block became the new canonical head.
    pub fn is_new_canonical_head(&self) -> bool {
        self.is_new_canonical_head
    }

    /// Number of the added block.
    pub fn block_number(&self) -> u64 {
        self.header.number
    }
}
