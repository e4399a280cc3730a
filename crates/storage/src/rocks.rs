//! RocksDB-backed world-state storage

use bytes::Bytes;
use protocore_types::H256;
use std::sync::Arc;
use tracing::debug;

use crate::db::{Column, Database, WriteBatch};
use crate::world_state::{WorldStateStorage, WorldStateUpdater};
use crate::{Result, StorageError};

/// Metadata key of the latest completed world state: `block_hash ++ state_root`
const LATEST_WORLD_STATE_KEY: &[u8] = b"latest_world_state";

/// [`WorldStateStorage`] persisted in a [`Database`].
#[derive(Clone)]
pub struct RocksWorldStateStorage {
    db: Arc<Database>,
}

impl RocksWorldStateStorage {
    /// Wrap an open database
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn get_bytes(&self, column: Column, hash: &H256) -> Result<Option<Bytes>> {
        Ok(self.db.get(column, hash.as_bytes())?.map(Bytes::from))
    }
}

impl WorldStateStorage for RocksWorldStateStorage {
    fn get_code(&self, hash: &H256) -> Result<Option<Bytes>> {
        self.get_bytes(Column::Code, hash)
    }

    fn get_account_state_trie_node(&self, hash: &H256) -> Result<Option<Bytes>> {
        self.get_bytes(Column::AccountTrie, hash)
    }

    fn get_account_storage_trie_node(&self, hash: &H256) -> Result<Option<Bytes>> {
        self.get_bytes(Column::StorageTrie, hash)
    }

    fn latest_world_state(&self) -> Result<Option<(H256, H256)>> {
        let Some(raw) = self.db.get(Column::Metadata, LATEST_WORLD_STATE_KEY)? else {
            return Ok(None);
        };
        if raw.len() != 64 {
            return Err(StorageError::Decode(format!(
                "latest world state marker has {} bytes",
                raw.len()
            )));
        }
        let decode = |bytes: &[u8]| {
            H256::from_slice(bytes).map_err(|e| StorageError::Decode(e.to_string()))
        };
        let block_hash = decode(&raw[..32])?;
        let state_root = decode(&raw[32..])?;
        Ok(Some((block_hash, state_root)))
    }

    fn updater(&self) -> Box<dyn WorldStateUpdater + '_> {
        Box::new(RocksUpdater {
            db: &self.db,
            batch: WriteBatch::new(),
        })
    }
}

struct RocksUpdater<'a> {
    db: &'a Database,
    batch: WriteBatch,
}

impl WorldStateUpdater for RocksUpdater<'_> {
    fn put_code(&mut self, hash: H256, code: Bytes) {
        self.batch.put(Column::Code, hash.as_bytes(), &code);
    }

    fn put_account_state_trie_node(&mut self, hash: H256, node: Bytes) {
        self.batch.put(Column::AccountTrie, hash.as_bytes(), &node);
    }

    fn put_account_storage_trie_node(&mut self, hash: H256, node: Bytes) {
        self.batch.put(Column::StorageTrie, hash.as_bytes(), &node);
    }

    fn record_world_state(&mut self, block_hash: H256, state_root: H256) {
        let mut marker = Vec::with_capacity(64);
        marker.extend_from_slice(block_hash.as_bytes());
        marker.extend_from_slice(state_root.as_bytes());
        self.batch.put(Column::Metadata, LATEST_WORLD_STATE_KEY, &marker);
    }

    fn pending(&self) -> usize {
        self.batch.len()
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let RocksUpdater { db, batch } = *self;
        if batch.is_empty() {
            return Ok(());
        }

        let count = batch.len();
        db.write_batch(batch)?;
        debug!(writes = count, "Committed world state batch");
        Ok(())
    }
}
