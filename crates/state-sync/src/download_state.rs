//! Shared state of one world-state download.
//!
//! [`WorldDownloadState`] owns the task queue and the buffer of downloaded
//! nodes, decides when the trie is fully resolved, and writes the root node
//! last so that a present root always implies a complete trie.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use protocore_config::SyncConfig;
use protocore_storage::{InMemoryRequestStore, RequestStore, WorldStateStorage};
use protocore_types::BlockHeader;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::task::{InMemoryTaskQueue, QueuedTask};
use crate::{NodeDataRequest, WorldStateSyncError};

/// What [`CompleteTaskStep`](crate::CompleteTaskStep) needs from a download session.
#[async_trait]
pub trait DownloadState: Send + Sync {
    /// Add requests to the queue
    async fn enqueue_requests(&self, requests: Vec<NodeDataRequest>);

    /// Wake workers waiting for work
    fn notify_task_available(&self);

    /// Finish the session if nothing is left to download. Returns whether the
    /// session is complete.
    fn check_completion(&self, storage: &dyn WorldStateStorage, header: &BlockHeader) -> bool;

    /// Hold the root node's bytes until the rest of the trie is stored
    fn set_root_node_data(&self, data: Bytes);

    /// Hold a downloaded node until the next flush
    fn buffer_node(&self, request: NodeDataRequest);
}

/// Lifecycle of a download session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadStatus {
    /// Workers are still fetching nodes
    Running,
    /// The whole trie and its root are stored
    Completed,
    /// Abandoned by the caller
    Cancelled,
    /// Ended by an error
    Failed(WorldStateSyncError),
}

impl DownloadStatus {
    /// Whether the session has ended
    pub fn is_finished(&self) -> bool {
        !matches!(self, DownloadStatus::Running)
    }
}

/// Snapshot of a session's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    /// Current lifecycle state
    pub status: DownloadStatus,
    /// Tasks completed so far
    pub completed_requests: u64,
    /// Requests in memory waiting for a worker
    pub pending_requests: usize,
    /// Most requests ever waiting in memory at once
    pub peak_pending_requests: usize,
    /// Requests spilled to the request store
    pub spilled_requests: usize,
    /// Requests taken by workers and not yet finished
    pub outstanding_requests: usize,
    /// Failed tasks put back for retry
    pub retried_requests: u64,
}

struct SessionState {
    status: DownloadStatus,
    root_node_data: Option<Bytes>,
    requests_without_progress: u64,
    last_progress: Instant,
}

/// State of one world-state download session.
///
/// At most `task_capacity` requests are held in memory. Requests enqueued
/// beyond that go to a [`RequestStore`] and are read back in order as
/// workers drain the queue. Downloaded nodes are buffered and written in one
/// commit per [`flush_writes`](Self::flush_writes); whatever is still
/// buffered at completion is written together with the root node.
pub struct WorldDownloadState {
    queue: InMemoryTaskQueue,
    session: Mutex<SessionState>,
    overflow: Arc<dyn RequestStore>,
    writes: Mutex<Vec<NodeDataRequest>>,
    progress_tx: watch::Sender<DownloadProgress>,
    task_capacity: usize,
    max_requests_without_progress: u64,
    min_time_before_stalling: Duration,
}

impl WorldDownloadState {
    /// Create a session using the limits in `config`
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_limits(
            config.world_state_task_capacity,
            config.world_state_max_requests_without_progress,
            config.min_time_before_stalling(),
        )
    }

    /// Create a session with explicit limits, spilling to memory
    pub fn with_limits(
        task_capacity: usize,
        max_requests_without_progress: u64,
        min_time_before_stalling: Duration,
    ) -> Self {
        let (progress_tx, _) = watch::channel(DownloadProgress {
            status: DownloadStatus::Running,
            completed_requests: 0,
            pending_requests: 0,
            peak_pending_requests: 0,
            spilled_requests: 0,
            outstanding_requests: 0,
            retried_requests: 0,
        });
        Self {
            queue: InMemoryTaskQueue::new(),
            session: Mutex::new(SessionState {
                status: DownloadStatus::Running,
                root_node_data: None,
                requests_without_progress: 0,
                last_progress: Instant::now(),
            }),
            overflow: Arc::new(InMemoryRequestStore::new()),
            writes: Mutex::new(Vec::new()),
            progress_tx,
            task_capacity,
            max_requests_without_progress,
            min_time_before_stalling,
        }
    }

    /// Spill requests beyond the task capacity to `store`
    pub fn with_request_store(mut self, store: Arc<dyn RequestStore>) -> Self {
        self.overflow = store;
        self
    }

    /// The session's in-memory task queue
    pub fn queue(&self) -> &InMemoryTaskQueue {
        &self.queue
    }

    /// Current lifecycle state
    pub fn status(&self) -> DownloadStatus {
        self.session.lock().status.clone()
    }

    /// Whether workers should keep going
    pub fn is_running(&self) -> bool {
        matches!(self.session.lock().status, DownloadStatus::Running)
    }

    /// Current counters
    pub fn progress(&self) -> DownloadProgress {
        let session = self.session.lock();
        self.snapshot(&session.status)
    }

    /// Receive a new [`DownloadProgress`] whenever the session changes
    pub fn subscribe(&self) -> watch::Receiver<DownloadProgress> {
        self.progress_tx.subscribe()
    }

    /// Number of downloaded nodes not yet written
    pub fn buffered_writes(&self) -> usize {
        self.writes.lock().len()
    }

    /// Write every buffered node in one commit. Returns how many were written.
    pub fn flush_writes(
        &self,
        storage: &dyn WorldStateStorage,
    ) -> Result<usize, WorldStateSyncError> {
        let mut writes = self.writes.lock();
        if writes.is_empty() {
            return Ok(0);
        }
        let mut updater = storage.updater();
        for request in writes.iter() {
            request.persist(updater.as_mut())?;
        }
        updater.commit()?;

        let count = writes.len();
        writes.clear();
        trace!(count, "Flushed world state nodes");
        Ok(count)
    }

    /// Wait for up to `max` tasks. Returns `None` once the session has ended.
    pub async fn next_batch(&self, max: usize) -> Option<Vec<QueuedTask>> {
        loop {
            let available = self.queue.task_available().notified();
            tokio::pin!(available);
            available.as_mut().enable();

            {
                let mut session = self.session.lock();
                if session.status.is_finished() {
                    return None;
                }
                if let Err(e) = self.refill_from_overflow() {
                    error!(error = %e, "Failed to read spilled requests");
                    self.finish(&mut session, DownloadStatus::Failed(e));
                    return None;
                }
            }
            let batch = self.queue.dequeue_batch(max);
            if !batch.is_empty() {
                return Some(batch);
            }

            available.await;
        }
    }

    /// Record the outcome of one network request for stall detection
    pub fn request_complete(&self, made_progress: bool) {
        let mut session = self.session.lock();
        if made_progress {
            session.requests_without_progress = 0;
            session.last_progress = Instant::now();
            return;
        }

        session.requests_without_progress += 1;
        let requests = session.requests_without_progress;
        if requests > self.max_requests_without_progress
            && session.last_progress.elapsed() >= self.min_time_before_stalling
        {
            warn!(requests, "World state download stalled");
            let err = WorldStateSyncError::Stalled { requests };
            self.finish(&mut session, DownloadStatus::Failed(err));
        }
    }

    /// End the session with an error. Ignored if it already ended.
    pub fn fail(&self, err: WorldStateSyncError) {
        let mut session = self.session.lock();
        if session.status.is_finished() {
            debug!(error = %err, "Ignoring failure of finished world state download");
            return;
        }
        error!(error = %err, "World state download failed");
        self.finish(&mut session, DownloadStatus::Failed(err));
    }

    /// Abandon the session. Pending work is dropped, waiting workers are
    /// released and later enqueues and completion checks do nothing.
    pub fn cancel(&self) {
        let mut session = self.session.lock();
        if session.status.is_finished() {
            return;
        }
        info!("World state download cancelled");
        self.finish(&mut session, DownloadStatus::Cancelled);
    }

    /// Mark the session complete without downloading anything
    pub(crate) fn complete_without_download(&self) {
        let mut session = self.session.lock();
        self.finish(&mut session, DownloadStatus::Completed);
    }

    /// Move spilled requests back into memory while there is room. Called
    /// with the session locked.
    fn refill_from_overflow(&self) -> Result<(), WorldStateSyncError> {
        let room = self.task_capacity.saturating_sub(self.queue.size());
        if room == 0 || self.overflow.is_empty() {
            return Ok(());
        }
        let requests = self
            .overflow
            .pop_front(room)?
            .iter()
            .map(|record| NodeDataRequest::deserialize(record))
            .collect::<Result<Vec<_>, _>>()?;
        trace!(count = requests.len(), "Restored spilled requests");
        self.queue.enqueue(requests);
        Ok(())
    }

    fn finish(&self, session: &mut SessionState, status: DownloadStatus) {
        if session.status.is_finished() {
            return;
        }
        session.status = status;
        self.queue.close();
        if let Err(e) = self.overflow.clear() {
            warn!(error = %e, "Failed to discard spilled requests");
        }
        self.progress_tx.send_replace(self.snapshot(&session.status));
    }

    fn snapshot(&self, status: &DownloadStatus) -> DownloadProgress {
        DownloadProgress {
            status: status.clone(),
            completed_requests: self.queue.completed_count(),
            pending_requests: self.queue.size(),
            peak_pending_requests: self.queue.peak_size(),
            spilled_requests: self.overflow.len(),
            outstanding_requests: self.queue.outstanding(),
            retried_requests: self.queue.retried_count(),
        }
    }
}

#[async_trait]
impl DownloadState for WorldDownloadState {
    async fn enqueue_requests(&self, mut requests: Vec<NodeDataRequest>) {
        if requests.is_empty() {
            return;
        }

        let mut session = self.session.lock();
        if session.status.is_finished() {
            debug!(count = requests.len(), "Dropping requests for finished session");
            return;
        }

        // Spilled requests are older than anything enqueued now.
        let room = if self.overflow.is_empty() {
            self.task_capacity.saturating_sub(self.queue.size())
        } else {
            0
        };
        let spilled = requests.split_off(room.min(requests.len()));
        self.queue.enqueue(requests);
        if spilled.is_empty() {
            return;
        }

        let count = spilled.len();
        let records = spilled.iter().map(NodeDataRequest::serialize).collect();
        if let Err(e) = self.overflow.push_back(records) {
            error!(error = %e, count, "Failed to spill requests");
            self.finish(&mut session, DownloadStatus::Failed(e.into()));
            return;
        }
        trace!(count, "Spilled requests beyond task capacity");
        self.queue.notify_task_available();
    }

    fn notify_task_available(&self) {
        self.queue.notify_task_available();
    }

    fn check_completion(&self, storage: &dyn WorldStateStorage, header: &BlockHeader) -> bool {
        let mut session = self.session.lock();
        match session.status {
            DownloadStatus::Completed => return true,
            DownloadStatus::Cancelled | DownloadStatus::Failed(_) => return false,
            DownloadStatus::Running => {}
        }

        if !self.queue.all_tasks_completed() || !self.overflow.is_empty() {
            self.progress_tx.send_replace(self.snapshot(&session.status));
            self.queue.notify_task_available();
            return false;
        }

        let Some(root) = session.root_node_data.clone() else {
            warn!(state_root = %header.state_root, "Trie resolved without root node, requesting it again");
            self.queue.enqueue([NodeDataRequest::account_trie_node(header.state_root)]);
            return false;
        };

        let mut writes = self.writes.lock();
        let mut updater = storage.updater();
        let staged = writes
            .iter()
            .try_for_each(|request| request.persist(updater.as_mut()));
        let committed = match staged {
            Ok(()) => {
                updater.save_world_state(header.hash(), header.state_root, root);
                updater.commit().map_err(WorldStateSyncError::from)
            }
            Err(e) => Err(WorldStateSyncError::from(e)),
        };
        if let Err(e) = committed {
            drop(writes);
            error!(error = %e, "Failed to store world state root");
            self.finish(&mut session, DownloadStatus::Failed(e));
            return false;
        }
        let flushed = writes.len();
        writes.clear();
        drop(writes);

        info!(
            block = header.number,
            state_root = %header.state_root,
            nodes = self.queue.completed_count(),
            flushed,
            "World state download complete"
        );
        self.finish(&mut session, DownloadStatus::Completed);
        true
    }

    fn set_root_node_data(&self, data: Bytes) {
        self.session.lock().root_node_data = Some(data);
    }

    fn buffer_node(&self, request: NodeDataRequest) {
        self.writes.lock().push(request);
    }
}
