//! FIFO stores for serialized download requests.
//!
//! A download keeps a bounded number of requests in memory. Requests beyond
//! that are pushed to a [`RequestStore`] and read back, oldest first, as the
//! in-memory queue drains.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::db::{Column, Database, WriteBatch};
use crate::{Result, StorageError};

/// Ordered store of opaque request records.
pub trait RequestStore: Send + Sync {
    /// Append `records` at the back
    fn push_back(&self, records: Vec<Vec<u8>>) -> Result<()>;

    /// Remove and return up to `max` records from the front
    fn pop_front(&self, max: usize) -> Result<Vec<Vec<u8>>>;

    /// Number of stored records
    fn len(&self) -> usize;

    /// Whether the store holds no records
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record
    fn clear(&self) -> Result<()>;
}

/// [`RequestStore`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    records: Mutex<VecDeque<Vec<u8>>>,
}

impl InMemoryRequestStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestStore for InMemoryRequestStore {
    fn push_back(&self, records: Vec<Vec<u8>>) -> Result<()> {
        self.records.lock().extend(records);
        Ok(())
    }

    fn pop_front(&self, max: usize) -> Result<Vec<Vec<u8>>> {
        let mut records = self.records.lock();
        let count = max.min(records.len());
        Ok(records.drain(..count).collect())
    }

    fn len(&self) -> usize {
        self.records.lock().len()
    }

    fn clear(&self) -> Result<()> {
        self.records.lock().clear();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Cursor {
    head: u64,
    tail: u64,
}

/// [`RequestStore`] in the [`Column::TaskQueue`] column, keyed by a
/// big-endian sequence number.
///
/// Records left by an earlier process are discarded on creation.
pub struct RocksRequestStore {
    db: Arc<Database>,
    cursor: Mutex<Cursor>,
}

impl RocksRequestStore {
    /// Open the store over `db`, dropping any stale records
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let mut batch = WriteBatch::new();
        batch.delete_range(
            Column::TaskQueue,
            &0u64.to_be_bytes(),
            &u64::MAX.to_be_bytes(),
        );
        db.write_batch(batch)?;
        debug!("Request store ready");
        Ok(Self {
            db,
            cursor: Mutex::new(Cursor::default()),
        })
    }
}

impl RequestStore for RocksRequestStore {
    fn push_back(&self, records: Vec<Vec<u8>>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut cursor = self.cursor.lock();
        let mut batch = WriteBatch::new();
        let mut seq = cursor.tail;
        for record in &records {
            batch.put(Column::TaskQueue, &seq.to_be_bytes(), record);
            seq += 1;
        }
        self.db.write_batch(batch)?;
        trace!(count = records.len(), "Spilled requests to disk");
        cursor.tail = seq;
        Ok(())
    }

    fn pop_front(&self, max: usize) -> Result<Vec<Vec<u8>>> {
        let mut cursor = self.cursor.lock();
        let end = cursor.head + (max as u64).min(cursor.tail - cursor.head);
        if end == cursor.head {
            return Ok(Vec::new());
        }

        let mut records = Vec::with_capacity((end - cursor.head) as usize);
        for seq in cursor.head..end {
            let record = self
                .db
                .get(Column::TaskQueue, &seq.to_be_bytes())?
                .ok_or_else(|| StorageError::Decode(format!("missing queued request {seq}")))?;
            records.push(record);
        }

        let mut batch = WriteBatch::new();
        batch.delete_range(
            Column::TaskQueue,
            &cursor.head.to_be_bytes(),
            &end.to_be_bytes(),
        );
        self.db.write_batch(batch)?;
        cursor.head = end;
        Ok(records)
    }

    fn len(&self) -> usize {
        let cursor = self.cursor.lock();
        (cursor.tail - cursor.head) as usize
    }

    fn clear(&self) -> Result<()> {
        let mut cursor = self.cursor.lock();
        if cursor.head == cursor.tail {
            return Ok(());
        }
        let mut batch = WriteBatch::new();
        batch.delete_range(
            Column::TaskQueue,
            &cursor.head.to_be_bytes(),
            &cursor.tail.to_be_bytes(),
        );
        self.db.write_batch(batch)?;
        cursor.head = cursor.tail;
        Ok(())
    }
}
