//! Account values stored at the leaves of the world-state trie.

use crate::{Error, Result, H256, EMPTY_CODE_HASH, EMPTY_TRIE_ROOT};
use alloy_primitives::U256;
use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};

/// The RLP list `[nonce, balance, storage_root, code_hash]` held by an
/// account-trie leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTrieAccountValue {
    /// Transaction count of the account
    pub nonce: u64,
    /// Balance in wei
    pub balance: U256,
    /// Root of the account's storage trie
    pub storage_root: H256,
    /// Hash of the account's contract code
    pub code_hash: H256,
}

impl StateTrieAccountValue {
    /// Decodes an account value from its RLP encoding.
    pub fn from_rlp(data: &[u8]) -> Result<Self> {
        rlp::decode(data).map_err(Error::RlpDecode)
    }

    /// Whether the account references a non-empty storage trie.
    pub fn has_storage(&self) -> bool {
        self.storage_root != EMPTY_TRIE_ROOT
    }

    /// Whether the account references contract code.
    pub fn has_code(&self) -> bool {
        self.code_hash != EMPTY_CODE_HASH
    }
}

impl Default for StateTrieAccountValue {
    fn default() -> Self {
        Self {
            nonce: 0,
            balance: U256::ZERO,
            storage_root: EMPTY_TRIE_ROOT,
            code_hash: EMPTY_CODE_HASH,
        }
    }
}

impl Encodable for StateTrieAccountValue {
    fn rlp_append(&self, s: &mut RlpStream) {
        s.begin_list(4);
        s.append(&self.nonce);
        let balance = self.balance.to_be_bytes_trimmed_vec();
        s.append(&balance);
        s.append(&self.storage_root);
        s.append(&self.code_hash);
    }
}

impl Decodable for StateTrieAccountValue {
    fn decode(rlp: &Rlp<'_>) -> std::result::Result<Self, DecoderError> {
        if rlp.item_count()? != 4 {
            return Err(DecoderError::RlpIncorrectListLen);
        }
        let balance = rlp.at(1)?.decoder().decode_value(|bytes| {
            if bytes.first() == Some(&0) {
                return Err(DecoderError::RlpInvalidIndirection);
            }
            U256::try_from_be_slice(bytes).ok_or(DecoderError::RlpIsTooBig)
        })?;
        Ok(Self {
            nonce: rlp.val_at(0)?,
            balance,
            storage_root: rlp.val_at(2)?,
            code_hash: rlp.val_at(3)?,
        })
    }
}
