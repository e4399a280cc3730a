//! RocksDB database holding world-state data
//!
//! Account-trie nodes, storage-trie nodes and contract code are content
//! addressed and each get their own [`Column`]. Sync markers live in
//! [`Column::Metadata`]; requests waiting to be downloaded are spilled to
//! [`Column::TaskQueue`].

use rocksdb::{
    ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode, MultiThreaded, Options,
    WriteBatchWithTransaction, WriteOptions,
};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

use crate::{Result, StorageError};

/// A column family of the world-state database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Account-trie nodes keyed by node hash
    AccountTrie,
    /// Storage-trie nodes keyed by node hash
    StorageTrie,
    /// Contract code keyed by code hash
    Code,
    /// Sync markers
    Metadata,
    /// Download requests spilled out of memory, keyed by sequence number
    TaskQueue,
}

impl Column {
    /// Every column, in creation order
    pub const ALL: [Column; 5] = [
        Column::AccountTrie,
        Column::StorageTrie,
        Column::Code,
        Column::Metadata,
        Column::TaskQueue,
    ];

    /// RocksDB column family name
    pub fn name(self) -> &'static str {
        match self {
            Column::AccountTrie => "account_trie",
            Column::StorageTrie => "storage_trie",
            Column::Code => "code",
            Column::Metadata => "metadata",
            Column::TaskQueue => "task_queue",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database directory
    pub path: PathBuf,
    /// Compress column data with LZ4
    pub enable_compression: bool,
    /// Maximum number of open files
    pub max_open_files: i32,
    /// Memtable size in bytes
    pub write_buffer_size: usize,
    /// Sync the WAL on every batch write
    pub sync_writes: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/world-state"),
            enable_compression: true,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
            sync_writes: false,
        }
    }
}

#[derive(Debug)]
enum BatchOp {
    Put(Column, Vec<u8>, Vec<u8>),
    Delete(Column, Vec<u8>),
    DeleteRange(Column, Vec<u8>, Vec<u8>),
}

/// Writes applied together by [`Database::write_batch`]
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    /// Create an empty batch
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `value` under `key` in `column`
    pub fn put(&mut self, column: Column, key: &[u8], value: &[u8]) {
        self.ops.push(BatchOp::Put(column, key.to_vec(), value.to_vec()));
    }

    /// Stage removal of `key` from `column`
    pub fn delete(&mut self, column: Column, key: &[u8]) {
        self.ops.push(BatchOp::Delete(column, key.to_vec()));
    }

    /// Stage removal of every key in `[from, to)` from `column`
    pub fn delete_range(&mut self, column: Column, from: &[u8], to: &[u8]) {
        self.ops.push(BatchOp::DeleteRange(column, from.to_vec(), to.to_vec()));
    }

    /// Number of staged writes
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether nothing is staged
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// World-state database
pub struct Database {
    inner: DBWithThreadMode<MultiThreaded>,
    config: DatabaseConfig,
}

impl Database {
    /// Open the database at `config.path`, creating it and any missing
    /// columns
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        info!(path = %config.path.display(), "Opening world state database");

        let compression = if config.enable_compression {
            DBCompressionType::Lz4
        } else {
            DBCompressionType::None
        };

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_compression_type(compression);

        let descriptors = Column::ALL.iter().map(|column| {
            let mut cf_opts = Options::default();
            cf_opts.set_compression_type(compression);
            ColumnFamilyDescriptor::new(column.name(), cf_opts)
        });

        let inner = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(
            &opts,
            &config.path,
            descriptors,
        )
        .map_err(|e| StorageError::Database(e.to_string()))?;

        debug!(columns = Column::ALL.len(), "World state database opened");
        Ok(Self { inner, config })
    }

    /// Open the database at `path` with default settings
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(DatabaseConfig {
            path: path.as_ref().to_path_buf(),
            ..Default::default()
        })
    }

    /// Read `key` from `column`
    pub fn get(&self, column: Column, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self
            .inner
            .cf_handle(column.name())
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(column.to_string()))?;
        self.inner
            .get_cf(&cf, key)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Whether `key` is present in `column`
    pub fn exists(&self, column: Column, key: &[u8]) -> Result<bool> {
        self.get(column, key).map(|value| value.is_some())
    }

    /// Apply every write in `batch` atomically
    pub fn write_batch(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut inner = WriteBatchWithTransaction::<false>::default();
        for op in &batch.ops {
            let column = match op {
                BatchOp::Put(column, ..)
                | BatchOp::Delete(column, _)
                | BatchOp::DeleteRange(column, ..) => *column,
            };
            let cf = self
                .inner
                .cf_handle(column.name())
                .ok_or_else(|| StorageError::ColumnFamilyNotFound(column.to_string()))?;
            match op {
                BatchOp::Put(_, key, value) => inner.put_cf(&cf, key, value),
                BatchOp::Delete(_, key) => inner.delete_cf(&cf, key),
                BatchOp::DeleteRange(_, from, to) => inner.delete_range_cf(&cf, from, to),
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.inner
            .write_opt(inner, &write_opts)
            .map_err(|e| StorageError::Database(e.to_string()))?;
        trace!(writes = batch.len(), "Wrote batch");
        Ok(())
    }

    /// Database directory
    pub fn path(&self) -> &Path {
        &self.config.path
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        debug!(path = %self.config.path.display(), "Closing world state database");
    }
}
