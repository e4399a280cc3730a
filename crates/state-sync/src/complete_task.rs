//! Finalization of one downloaded task.

use protocore_storage::WorldStateStorage;
use protocore_types::BlockHeader;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, trace};

use crate::download_state::DownloadState;
use crate::task::Task;
use crate::RequestKind;

/// Decides whether a task that came back from a peer succeeded, and if so
/// buffers its node for writing and queues the nodes it references.
pub struct CompleteTaskStep {
    storage: Arc<dyn WorldStateStorage>,
    completed: AtomicU64,
    failed: AtomicU64,
}

impl CompleteTaskStep {
    /// Create a step checking completion against `storage`
    pub fn new(storage: Arc<dyn WorldStateStorage>) -> Self {
        Self {
            storage,
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Tasks marked completed by this step
    pub fn completed_count(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Tasks marked failed by this step
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Finish `task` for the download of `header`'s state.
    ///
    /// A task without data, or whose data cannot be decoded, is marked failed
    /// and workers are woken to retry it. Otherwise the node is buffered in
    /// `download_state` (the target's root node is held separately), its
    /// children are enqueued, the task is completed and the session is checked
    /// for completion.
    pub async fn mark_as_complete_or_failed<S, T>(
        &self,
        header: &BlockHeader,
        download_state: &S,
        task: &mut T,
    ) where
        S: DownloadState + ?Sized,
        T: Task + ?Sized,
    {
        let request = task.data();
        let Some(data) = request.data().cloned() else {
            trace!(request = %request, "No data for task");
            self.fail(download_state, task);
            return;
        };

        let children = match request.child_requests() {
            Ok(children) => children,
            Err(e) => {
                error!(hash = %request.hash(), kind = %request.kind(), error = %e, "Received invalid world state node");
                self.fail(download_state, task);
                return;
            }
        };

        if request.kind() == RequestKind::AccountTrieNode && request.hash() == header.state_root {
            download_state.set_root_node_data(data);
        } else {
            download_state.buffer_node(request.clone());
        }

        download_state.enqueue_requests(children).await;
        task.mark_completed();
        self.completed.fetch_add(1, Ordering::Relaxed);
        download_state.check_completion(self.storage.as_ref(), header);
    }

    fn fail<S, T>(&self, download_state: &S, task: &mut T)
    where
        S: DownloadState + ?Sized,
        T: Task + ?Sized,
    {
        task.mark_failed();
        self.failed.fetch_add(1, Ordering::Relaxed);
        download_state.notify_task_available();
    }
}
