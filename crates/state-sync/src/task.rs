//! Tasks handed to download workers.
//!
//! Each [`QueuedTask`] holds one [`NodeDataRequest`] taken from an
//! [`InMemoryTaskQueue`]. A task ends exactly once: completing it releases its
//! in-flight slot, failing it (or dropping it unmarked) puts the request back
//! at the front of the queue.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::trace;

use crate::NodeDataRequest;

/// A unit of work over one request.
pub trait Task: Send {
    /// The request being worked on
    fn data(&self) -> &NodeDataRequest;

    /// Mutable access, used to attach the node's bytes
    fn data_mut(&mut self) -> &mut NodeDataRequest;

    /// Finish the task successfully. Ignored if the task already ended.
    fn mark_completed(&mut self);

    /// Finish the task unsuccessfully so it can be retried. Ignored if the task
    /// already ended.
    fn mark_failed(&mut self);

    /// Whether [`mark_completed`](Self::mark_completed) took effect
    fn is_completed(&self) -> bool;

    /// Whether [`mark_failed`](Self::mark_failed) took effect
    fn is_failed(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Pending,
    Completed,
    Failed,
}

#[derive(Default)]
struct QueueInner {
    pending: VecDeque<NodeDataRequest>,
    peak: usize,
    outstanding: usize,
    completed: u64,
    retried: u64,
    closed: bool,
}

struct QueueShared {
    inner: Mutex<QueueInner>,
    task_available: Notify,
}

impl QueueShared {
    fn finish(&self, retry: Option<NodeDataRequest>) {
        let mut inner = self.inner.lock();
        inner.outstanding = inner.outstanding.saturating_sub(1);
        match retry {
            None => inner.completed += 1,
            Some(request) if !inner.closed => {
                trace!(request = %request, "Requeueing failed task");
                inner.retried += 1;
                inner.pending.push_front(request);
                inner.peak = inner.peak.max(inner.pending.len());
                drop(inner);
                self.task_available.notify_waiters();
            }
            Some(_) => {}
        }
    }
}

/// FIFO of pending requests plus a count of tasks in flight.
#[derive(Clone)]
pub struct InMemoryTaskQueue {
    shared: Arc<QueueShared>,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTaskQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            shared: Arc::new(QueueShared {
                inner: Mutex::new(QueueInner::default()),
                task_available: Notify::new(),
            }),
        }
    }

    /// Append requests to the back of the queue. Returns how many were added;
    /// a closed queue accepts nothing.
    pub fn enqueue<I>(&self, requests: I) -> usize
    where
        I: IntoIterator<Item = NodeDataRequest>,
    {
        let added = {
            let mut inner = self.shared.inner.lock();
            if inner.closed {
                return 0;
            }
            let before = inner.pending.len();
            inner.pending.extend(requests);
            inner.peak = inner.peak.max(inner.pending.len());
            inner.pending.len() - before
        };
        if added > 0 {
            self.shared.task_available.notify_waiters();
        }
        added
    }

    /// Take the request at the front of the queue
    pub fn dequeue(&self) -> Option<QueuedTask> {
        self.dequeue_batch(1).pop()
    }

    /// Take up to `max` requests from the front of the queue
    pub fn dequeue_batch(&self, max: usize) -> Vec<QueuedTask> {
        let mut inner = self.shared.inner.lock();
        if inner.closed {
            return Vec::new();
        }
        let count = max.min(inner.pending.len());
        inner.outstanding += count;
        inner
            .pending
            .drain(..count)
            .map(|request| QueuedTask {
                request,
                state: TaskState::Pending,
                queue: Arc::clone(&self.shared),
            })
            .collect()
    }

    /// Number of requests waiting to be taken
    pub fn size(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    /// Most requests ever waiting at once
    pub fn peak_size(&self) -> usize {
        self.shared.inner.lock().peak
    }

    /// Number of tasks taken but not yet completed or failed
    pub fn outstanding(&self) -> usize {
        self.shared.inner.lock().outstanding
    }

    /// Number of tasks completed so far
    pub fn completed_count(&self) -> u64 {
        self.shared.inner.lock().completed
    }

    /// Number of failed tasks put back for retry
    pub fn retried_count(&self) -> u64 {
        self.shared.inner.lock().retried
    }

    /// Nothing pending and nothing in flight
    pub fn all_tasks_completed(&self) -> bool {
        let inner = self.shared.inner.lock();
        inner.pending.is_empty() && inner.outstanding == 0
    }

    /// Copy of the pending requests, front first
    pub fn pending_requests(&self) -> Vec<NodeDataRequest> {
        self.shared.inner.lock().pending.iter().cloned().collect()
    }

    /// Drop all pending requests and refuse new ones. Tasks still in flight
    /// can be marked but are never requeued.
    pub fn close(&self) {
        {
            let mut inner = self.shared.inner.lock();
            inner.closed = true;
            inner.pending.clear();
        }
        self.shared.task_available.notify_waiters();
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.shared.inner.lock().closed
    }

    /// Wake everything waiting for work
    pub fn notify_task_available(&self) {
        self.shared.task_available.notify_waiters();
    }

    pub(crate) fn task_available(&self) -> &Notify {
        &self.shared.task_available
    }
}

/// A request taken from an [`InMemoryTaskQueue`].
pub struct QueuedTask {
    request: NodeDataRequest,
    state: TaskState,
    queue: Arc<QueueShared>,
}

impl Task for QueuedTask {
    fn data(&self) -> &NodeDataRequest {
        &self.request
    }

    fn data_mut(&mut self) -> &mut NodeDataRequest {
        &mut self.request
    }

    fn mark_completed(&mut self) {
        if self.state == TaskState::Pending {
            self.state = TaskState::Completed;
            self.queue.finish(None);
        }
    }

    fn mark_failed(&mut self) {
        if self.state == TaskState::Pending {
            self.state = TaskState::Failed;
            self.queue.finish(Some(self.request.without_data()));
        }
    }

    fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    fn is_failed(&self) -> bool {
        self.state == TaskState::Failed
    }
}

impl Drop for QueuedTask {
    fn drop(&mut self) {
        self.mark_failed();
    }
}

/// A free-standing task, not tied to any queue.
#[derive(Debug, Clone)]
pub struct StandaloneTask {
    request: NodeDataRequest,
    state: TaskState,
}

impl StandaloneTask {
    /// Wrap a request
    pub fn new(request: NodeDataRequest) -> Self {
        Self {
            request,
            state: TaskState::Pending,
        }
    }
}

impl Task for StandaloneTask {
    fn data(&self) -> &NodeDataRequest {
        &self.request
    }

    fn data_mut(&mut self) -> &mut NodeDataRequest {
        &mut self.request
    }

    fn mark_completed(&mut self) {
        if self.state == TaskState::Pending {
            self.state = TaskState::Completed;
        }
    }

    fn mark_failed(&mut self) {
        if self.state == TaskState::Pending {
            self.state = TaskState::Failed;
        }
    }

    fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    fn is_failed(&self) -> bool {
        self.state == TaskState::Failed
    }
}
