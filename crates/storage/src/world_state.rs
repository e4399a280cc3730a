//! World-state storage interfaces
//!
//! World-state data is content addressed: trie nodes and contract code are
//! stored under the Keccak256 hash of their bytes. Writes go through a
//! [`WorldStateUpdater`] and become visible together when it is committed.

use bytes::Bytes;
use parking_lot::RwLock;
use protocore_types::{H256, EMPTY_TRIE_ROOT};
use std::collections::HashMap;
use tracing::debug;

use crate::Result;

/// Read access to persisted world-state data.
pub trait WorldStateStorage: Send + Sync {
    /// Contract code with the given hash
    fn get_code(&self, hash: &H256) -> Result<Option<Bytes>>;

    /// Account-trie node with the given hash
    fn get_account_state_trie_node(&self, hash: &H256) -> Result<Option<Bytes>>;

    /// Storage-trie node with the given hash
    fn get_account_storage_trie_node(&self, hash: &H256) -> Result<Option<Bytes>>;

    /// Any node or code blob with the given hash
    fn get_node_data(&self, hash: &H256) -> Result<Option<Bytes>> {
        if let Some(data) = self.get_account_state_trie_node(hash)? {
            return Ok(Some(data));
        }
        if let Some(data) = self.get_account_storage_trie_node(hash)? {
            return Ok(Some(data));
        }
        self.get_code(hash)
    }

    /// Whether the trie rooted at `root` is locally available.
    ///
    /// The root node is written last, so its presence implies the whole trie.
    fn is_world_state_available(&self, root: &H256) -> Result<bool> {
        Ok(*root == EMPTY_TRIE_ROOT || self.get_account_state_trie_node(root)?.is_some())
    }

    /// Block hash and state root recorded by the last completed download
    fn latest_world_state(&self) -> Result<Option<(H256, H256)>>;

    /// Begin a batch of writes
    fn updater(&self) -> Box<dyn WorldStateUpdater + '_>;
}

/// A batch of world-state writes, applied atomically on [`commit`](Self::commit).
pub trait WorldStateUpdater {
    /// Stage contract code
    fn put_code(&mut self, hash: H256, code: Bytes);

    /// Stage an account-trie node
    fn put_account_state_trie_node(&mut self, hash: H256, node: Bytes);

    /// Stage a storage-trie node
    fn put_account_storage_trie_node(&mut self, hash: H256, node: Bytes);

    /// Stage the root node of a downloaded trie and record it as the latest
    /// available world state for `block_hash`
    fn save_world_state(&mut self, block_hash: H256, state_root: H256, root_node: Bytes) {
        self.put_account_state_trie_node(state_root, root_node);
        self.record_world_state(block_hash, state_root);
    }

    /// Stage the latest-world-state marker
    fn record_world_state(&mut self, block_hash: H256, state_root: H256);

    /// Number of staged writes
    fn pending(&self) -> usize;

    /// Apply all staged writes. Once this returns `Ok` the data is durable.
    fn commit(self: Box<Self>) -> Result<()>;
}

#[derive(Default)]
struct MemoryState {
    account_nodes: HashMap<H256, Bytes>,
    storage_nodes: HashMap<H256, Bytes>,
    code: HashMap<H256, Bytes>,
    latest: Option<(H256, H256)>,
    commits: u64,
}

/// World-state storage kept in memory.
#[derive(Default)]
pub struct InMemoryWorldStateStorage {
    state: RwLock<MemoryState>,
}

impl InMemoryWorldStateStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updater commits applied so far
    pub fn commit_count(&self) -> u64 {
        self.state.read().commits
    }

    /// Total number of stored nodes and code blobs
    pub fn entry_count(&self) -> usize {
        let state = self.state.read();
        state.account_nodes.len() + state.storage_nodes.len() + state.code.len()
    }
}

impl WorldStateStorage for InMemoryWorldStateStorage {
    fn get_code(&self, hash: &H256) -> Result<Option<Bytes>> {
        Ok(self.state.read().code.get(hash).cloned())
    }

    fn get_account_state_trie_node(&self, hash: &H256) -> Result<Option<Bytes>> {
        Ok(self.state.read().account_nodes.get(hash).cloned())
    }

    fn get_account_storage_trie_node(&self, hash: &H256) -> Result<Option<Bytes>> {
        Ok(self.state.read().storage_nodes.get(hash).cloned())
    }

    fn latest_world_state(&self) -> Result<Option<(H256, H256)>> {
        Ok(self.state.read().latest)
    }

    fn updater(&self) -> Box<dyn WorldStateUpdater + '_> {
        Box::new(InMemoryUpdater {
            storage: self,
            ops: Vec::new(),
        })
    }
}

enum MemoryOp {
    Code(H256, Bytes),
    AccountNode(H256, Bytes),
    StorageNode(H256, Bytes),
    Latest(H256, H256),
}

struct InMemoryUpdater<'a> {
    storage: &'a InMemoryWorldStateStorage,
    ops: Vec<MemoryOp>,
}

impl WorldStateUpdater for InMemoryUpdater<'_> {
    fn put_code(&mut self, hash: H256, code: Bytes) {
        self.ops.push(MemoryOp::Code(hash, code));
    }

    fn put_account_state_trie_node(&mut self, hash: H256, node: Bytes) {
        self.ops.push(MemoryOp::AccountNode(hash, node));
    }

    fn put_account_storage_trie_node(&mut self, hash: H256, node: Bytes) {
        self.ops.push(MemoryOp::StorageNode(hash, node));
    }

    fn record_world_state(&mut self, block_hash: H256, state_root: H256) {
        self.ops.push(MemoryOp::Latest(block_hash, state_root));
    }

    fn pending(&self) -> usize {
        self.ops.len()
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryUpdater { storage, ops } = *self;
        let count = ops.len();
        let mut state = storage.state.write();
        for op in ops {
            match op {
                MemoryOp::Code(hash, code) => {
                    state.code.insert(hash, code);
                }
                MemoryOp::AccountNode(hash, node) => {
                    state.account_nodes.insert(hash, node);
                }
                MemoryOp::StorageNode(hash, node) => {
                    state.storage_nodes.insert(hash, node);
                }
                MemoryOp::Latest(block_hash, state_root) => {
                    state.latest = Some((block_hash, state_root));
                }
            }
        }
        state.commits += 1;
        debug!(writes = count, "Committed in-memory world state update");
        Ok(())
    }
}
