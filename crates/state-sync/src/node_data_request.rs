//! Requests for individual world-state nodes.
//!
//! A [`NodeDataRequest`] names one trie node or code blob by hash. Once a peer
//! (or local storage) supplies the bytes, the request can be persisted and
//! asked for the further requests its node implies.

use bytes::Bytes;
use protocore_storage::{TrieNode, TrieReference, WorldStateStorage, WorldStateUpdater};
use protocore_types::{StateTrieAccountValue, H256, HASH_SIZE};
use std::fmt;

use crate::NodeDataError;

/// Length of a serialized request: one kind byte and the hash.
pub const SERIALIZED_REQUEST_LEN: usize = 1 + HASH_SIZE;

/// Which keyspace a requested node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestKind {
    /// Node of the account (state) trie
    AccountTrieNode = 0,
    /// Node of some account's storage trie
    StorageTrieNode = 1,
    /// Contract code
    Code = 2,
}

impl RequestKind {
    /// Kind for a serialized tag byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::AccountTrieNode),
            1 => Some(Self::StorageTrieNode),
            2 => Some(Self::Code),
            _ => None,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AccountTrieNode => write!(f, "account trie node"),
            Self::StorageTrieNode => write!(f, "storage trie node"),
            Self::Code => write!(f, "code"),
        }
    }
}

/// One node to fetch, and its bytes once they arrive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeDataRequest {
    kind: RequestKind,
    hash: H256,
    data: Option<Bytes>,
}

impl NodeDataRequest {
    /// Create a request with no data
    pub fn new(kind: RequestKind, hash: H256) -> Self {
        Self {
            kind,
            hash,
            data: None,
        }
    }

    /// Request an account-trie node
    pub fn account_trie_node(hash: H256) -> Self {
        Self::new(RequestKind::AccountTrieNode, hash)
    }

    /// Request a storage-trie node
    pub fn storage_trie_node(hash: H256) -> Self {
        Self::new(RequestKind::StorageTrieNode, hash)
    }

    /// Request contract code
    pub fn code(hash: H256) -> Self {
        Self::new(RequestKind::Code, hash)
    }

    /// Hash of the requested node
    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// Keyspace of the requested node
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// The node's bytes, if they have arrived
    pub fn data(&self) -> Option<&Bytes> {
        self.data.as_ref()
    }

    /// Whether data is attached
    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Attach the node's bytes. Bytes that do not hash to the requested hash
    /// are rejected and the request is left unchanged.
    pub fn set_data(&mut self, data: Bytes) -> Result<(), NodeDataError> {
        let actual = H256::keccak256(&data);
        if actual != self.hash {
            return Err(NodeDataError::HashMismatch {
                expected: self.hash,
                actual,
            });
        }
        self.data = Some(data);
        Ok(())
    }

    /// Copy of this request without its data
    pub fn without_data(&self) -> Self {
        Self::new(self.kind, self.hash)
    }

    /// Requests for everything the attached node references.
    ///
    /// Hash-referenced children keep the kind of this request and come in
    /// breadth-first order. An account leaf adds its code request and then its
    /// storage-root request, skipping the empty code hash and empty trie root.
    pub fn child_requests(&self) -> Result<Vec<NodeDataRequest>, NodeDataError> {
        let data = self.data.as_ref().ok_or(NodeDataError::MissingData(self.hash))?;

        if self.kind == RequestKind::Code {
            return Ok(Vec::new());
        }

        let node = TrieNode::decode(data).map_err(|e| self.decode_error(e))?;
        let mut children = Vec::new();
        for reference in node.references() {
            match reference {
                TrieReference::Node(hash) => children.push(Self::new(self.kind, hash)),
                TrieReference::Value(value) => {
                    if self.kind == RequestKind::AccountTrieNode {
                        let account = StateTrieAccountValue::from_rlp(&value)
                            .map_err(|e| self.decode_error(e))?;
                        if account.has_code() {
                            children.push(Self::code(account.code_hash));
                        }
                        if account.has_storage() {
                            children.push(Self::storage_trie_node(account.storage_root));
                        }
                    }
                }
            }
        }

        Ok(children)
    }

    /// The node's bytes if local storage already holds them
    pub fn existing_data<S>(&self, storage: &S) -> Result<Option<Bytes>, NodeDataError>
    where
        S: WorldStateStorage + ?Sized,
    {
        let data = match self.kind {
            RequestKind::AccountTrieNode => storage.get_account_state_trie_node(&self.hash)?,
            RequestKind::StorageTrieNode => storage.get_account_storage_trie_node(&self.hash)?,
            RequestKind::Code => storage.get_code(&self.hash)?,
        };
        Ok(data)
    }

    /// Stage the attached bytes in the keyspace for this request's kind
    pub fn persist<U>(&self, updater: &mut U) -> Result<(), NodeDataError>
    where
        U: WorldStateUpdater + ?Sized,
    {
        let data = self.data.clone().ok_or(NodeDataError::MissingData(self.hash))?;
        match self.kind {
            RequestKind::AccountTrieNode => updater.put_account_state_trie_node(self.hash, data),
            RequestKind::StorageTrieNode => {
                updater.put_account_storage_trie_node(self.hash, data)
            }
            RequestKind::Code => updater.put_code(self.hash, data),
        }
        Ok(())
    }

    /// Compact encoding of the request: kind byte followed by the hash.
    /// Data is not included.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SERIALIZED_REQUEST_LEN);
        out.push(self.kind as u8);
        out.extend_from_slice(self.hash.as_bytes());
        out
    }

    /// Decode a request written by [`serialize`](Self::serialize)
    pub fn deserialize(bytes: &[u8]) -> Result<Self, NodeDataError> {
        if bytes.len() != SERIALIZED_REQUEST_LEN {
            return Err(NodeDataError::InvalidEncoding(format!(
                "expected {} bytes, got {}",
                SERIALIZED_REQUEST_LEN,
                bytes.len()
            )));
        }
        let kind = RequestKind::from_byte(bytes[0]).ok_or_else(|| {
            NodeDataError::InvalidEncoding(format!("unknown request kind {}", bytes[0]))
        })?;
        let hash = H256::from_slice(&bytes[1..])
            .map_err(|e| NodeDataError::InvalidEncoding(e.to_string()))?;
        Ok(Self::new(kind, hash))
    }

    fn decode_error(&self, err: impl fmt::Display) -> NodeDataError {
        NodeDataError::Decode {
            hash: self.hash,
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for NodeDataRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.hash)
    }
}
