//! Tests for download session state

use bytes::Bytes;
use protocore_state_sync::{
    DownloadState, DownloadStatus, NodeDataRequest, QueuedTask, Task, WorldDownloadState,
    WorldStateSyncError,
};
use protocore_storage::{
    InMemoryRequestStore, InMemoryWorldStateStorage, RequestStore, StorageError, TrieNode,
    WorldStateStorage, WorldStateUpdater,
};
use protocore_types::{BlockHeader, H256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

fn session(capacity: usize) -> WorldDownloadState {
    WorldDownloadState::with_limits(capacity, 1000, Duration::from_secs(300))
}

fn request(n: u32) -> NodeDataRequest {
    NodeDataRequest::storage_trie_node(H256::keccak256(&n.to_be_bytes()))
}

fn node_with_data(data: Vec<u8>) -> NodeDataRequest {
    let data = Bytes::from(data);
    let mut node = NodeDataRequest::storage_trie_node(H256::keccak256(&data));
    node.set_data(data).unwrap();
    node
}

fn completed(mut batch: Vec<QueuedTask>) -> Vec<QueuedTask> {
    for task in &mut batch {
        task.mark_completed();
    }
    batch
}

struct BrokenRequestStore;

impl RequestStore for BrokenRequestStore {
    fn push_back(&self, _records: Vec<Vec<u8>>) -> protocore_storage::Result<()> {
        Err(StorageError::Database("disk full".to_string()))
    }

    fn pop_front(&self, _max: usize) -> protocore_storage::Result<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    fn len(&self) -> usize {
        0
    }

    fn clear(&self) -> protocore_storage::Result<()> {
        Ok(())
    }
}

struct FailingStorage;

struct FailingUpdater;

impl WorldStateUpdater for FailingUpdater {
    fn put_code(&mut self, _hash: H256, _code: Bytes) {}
    fn put_account_state_trie_node(&mut self, _hash: H256, _node: Bytes) {}
    fn put_account_storage_trie_node(&mut self, _hash: H256, _node: Bytes) {}
    fn record_world_state(&mut self, _block_hash: H256, _state_root: H256) {}

    fn pending(&self) -> usize {
        0
    }

    fn commit(self: Box<Self>) -> protocore_storage::Result<()> {
        Err(StorageError::Database("disk full".to_string()))
    }
}

impl WorldStateStorage for FailingStorage {
    fn get_code(&self, _hash: &H256) -> protocore_storage::Result<Option<Bytes>> {
        Ok(None)
    }

    fn get_account_state_trie_node(&self, _hash: &H256) -> protocore_storage::Result<Option<Bytes>> {
        Ok(None)
    }

    fn get_account_storage_trie_node(
        &self,
        _hash: &H256,
    ) -> protocore_storage::Result<Option<Bytes>> {
        Ok(None)
    }

    fn latest_world_state(&self) -> protocore_storage::Result<Option<(H256, H256)>> {
        Ok(None)
    }

    fn updater(&self) -> Box<dyn WorldStateUpdater + '_> {
        Box::new(FailingUpdater)
    }
}

fn root_node() -> (Bytes, BlockHeader) {
    let root = Bytes::from(TrieNode::empty_branch().encode());
    let header = BlockHeader::new(42, H256::keccak256(b"parent"), H256::keccak256(&root));
    (root, header)
}

#[test]
fn test_completion_writes_root_once() {
    let state = session(100);
    let storage = InMemoryWorldStateStorage::new();
    let (root, header) = root_node();
    state.set_root_node_data(root.clone());

    assert!(state.check_completion(&storage, &header));
    assert!(state.check_completion(&storage, &header));

    assert_eq!(storage.commit_count(), 1);
    assert_eq!(
        storage.get_account_state_trie_node(&header.state_root).unwrap(),
        Some(root)
    );
    assert_eq!(
        storage.latest_world_state().unwrap(),
        Some((header.hash(), header.state_root))
    );
    assert!(storage.is_world_state_available(&header.state_root).unwrap());
    assert_eq!(state.status(), DownloadStatus::Completed);
}

#[tokio::test]
async fn test_not_complete_while_work_remains() {
    let state = session(100);
    let storage = InMemoryWorldStateStorage::new();
    let (root, header) = root_node();
    state.set_root_node_data(root);

    state.enqueue_requests(vec![request(1)]).await;
    assert!(!state.check_completion(&storage, &header));

    let mut batch = state.next_batch(10).await.unwrap();
    assert!(!state.check_completion(&storage, &header));

    batch[0].mark_completed();
    assert!(state.check_completion(&storage, &header));
    assert_eq!(storage.commit_count(), 1);
}

#[test]
fn test_missing_root_is_requested_again() {
    let state = session(100);
    let storage = InMemoryWorldStateStorage::new();
    let (_, header) = root_node();

    assert!(!state.check_completion(&storage, &header));

    assert_eq!(
        state.queue().pending_requests(),
        vec![NodeDataRequest::account_trie_node(header.state_root)]
    );
    assert_eq!(storage.commit_count(), 0);
    assert!(state.is_running());
}

#[tokio::test]
async fn test_cancelled_session_ignores_work() {
    let state = session(100);
    let storage = InMemoryWorldStateStorage::new();
    let (root, header) = root_node();
    state.enqueue_requests(vec![request(1)]).await;
    let batch = state.next_batch(1).await.unwrap();

    state.cancel();
    drop(batch);

    state.enqueue_requests(vec![request(2)]).await;
    state.set_root_node_data(root);
    assert!(!state.check_completion(&storage, &header));
    assert!(state.next_batch(1).await.is_none());
    assert_eq!(state.queue().size(), 0);
    assert_eq!(storage.commit_count(), 0);
    assert_eq!(state.status(), DownloadStatus::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_enqueue_keeps_every_request() {
    let state = Arc::new(session(100_000));

    let producers: Vec<_> = (0..8u32)
        .map(|producer| {
            let state = state.clone();
            tokio::spawn(async move {
                let requests = (0..50).map(|n| request(producer * 1000 + n)).collect();
                state.enqueue_requests(requests).await;
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    let pending = state.queue().pending_requests();
    let unique: HashSet<H256> = pending.iter().map(|r| r.hash()).collect();
    let expected: HashSet<H256> = (0..8u32)
        .flat_map(|producer| (0..50).map(move |n| request(producer * 1000 + n).hash()))
        .collect();
    assert_eq!(pending.len(), 400);
    assert_eq!(unique, expected);
}

#[tokio::test]
async fn test_requests_beyond_capacity_are_spilled() {
    let store = Arc::new(InMemoryRequestStore::new());
    let state = session(2).with_request_store(store.clone());

    state.enqueue_requests((1..=5).map(request).collect()).await;
    assert_eq!(state.queue().size(), 2);
    assert_eq!(store.len(), 3);
    assert_eq!(state.progress().spilled_requests, 3);

    // Later requests queue behind the spilled ones even when memory has room.
    let first = state.next_batch(2).await.unwrap();
    state.enqueue_requests(vec![request(6)]).await;
    assert_eq!(store.len(), 4);
    drop(completed(first));

    let mut order = Vec::new();
    while order.len() < 4 {
        let batch = state.next_batch(2).await.unwrap();
        assert!(state.queue().size() <= 2);
        order.extend(batch.iter().map(|task| task.data().hash()));
        drop(completed(batch));
    }
    let expected: Vec<H256> = (3..=6).map(|n| request(n).hash()).collect();
    assert_eq!(order, expected);
    assert!(store.is_empty());
    assert_eq!(state.queue().peak_size(), 2);
}

#[tokio::test]
async fn test_not_complete_while_requests_are_spilled() {
    let state = session(1);
    let storage = InMemoryWorldStateStorage::new();
    let (root, header) = root_node();
    state.set_root_node_data(root);

    state.enqueue_requests(vec![request(1), request(2)]).await;
    let batch = state.next_batch(1).await.unwrap();
    drop(completed(batch));
    assert_eq!(state.queue().size(), 0);
    assert_eq!(state.progress().spilled_requests, 1);
    assert!(!state.check_completion(&storage, &header));

    let batch = state.next_batch(1).await.unwrap();
    assert_eq!(batch[0].data().hash(), request(2).hash());
    drop(completed(batch));
    assert!(state.check_completion(&storage, &header));
}

#[tokio::test]
async fn test_cancel_discards_spilled_requests() {
    let store = Arc::new(InMemoryRequestStore::new());
    let state = session(1).with_request_store(store.clone());
    state.enqueue_requests(vec![request(1), request(2), request(3)]).await;
    assert_eq!(store.len(), 2);

    state.cancel();
    assert!(store.is_empty());
    assert!(state.next_batch(1).await.is_none());
}

#[tokio::test]
async fn test_spill_failure_fails_session() {
    let state = session(1).with_request_store(Arc::new(BrokenRequestStore));
    state.enqueue_requests(vec![request(1), request(2)]).await;

    assert!(matches!(
        state.status(),
        DownloadStatus::Failed(WorldStateSyncError::Storage(msg)) if msg.contains("disk full")
    ));
}

#[test]
fn test_flush_writes_buffered_nodes_in_one_commit() {
    let state = session(100);
    let storage = InMemoryWorldStateStorage::new();
    let nodes: Vec<_> = (1..=3u8).map(|n| node_with_data(vec![0x80 + n])).collect();
    for node in &nodes {
        state.buffer_node(node.clone());
    }
    assert_eq!(state.buffered_writes(), 3);

    assert_eq!(state.flush_writes(&storage).unwrap(), 3);
    assert_eq!(storage.commit_count(), 1);
    assert_eq!(state.buffered_writes(), 0);
    for node in &nodes {
        assert_eq!(
            storage.get_account_storage_trie_node(&node.hash()).unwrap(),
            node.data().cloned()
        );
    }

    assert_eq!(state.flush_writes(&storage).unwrap(), 0);
    assert_eq!(storage.commit_count(), 1);
}

#[test]
fn test_completion_writes_buffered_nodes_with_root() {
    let state = session(100);
    let storage = InMemoryWorldStateStorage::new();
    let (root, header) = root_node();
    let node = node_with_data(vec![0x81]);
    state.buffer_node(node.clone());
    state.set_root_node_data(root);

    assert!(state.check_completion(&storage, &header));

    assert_eq!(storage.commit_count(), 1);
    assert_eq!(state.buffered_writes(), 0);
    assert_eq!(
        storage.get_account_storage_trie_node(&node.hash()).unwrap(),
        node.data().cloned()
    );
    assert!(storage.is_world_state_available(&header.state_root).unwrap());
}

#[test]
fn test_failed_flush_keeps_buffer_and_root_unwritten() {
    let state = session(100);
    let (root, header) = root_node();
    state.buffer_node(node_with_data(vec![0x81]));

    assert!(matches!(
        state.flush_writes(&FailingStorage),
        Err(WorldStateSyncError::Storage(_))
    ));
    assert_eq!(state.buffered_writes(), 1);

    state.set_root_node_data(root);
    assert!(!state.check_completion(&FailingStorage, &header));
    assert!(matches!(state.status(), DownloadStatus::Failed(_)));
}

#[tokio::test]
async fn test_worker_wakes_on_enqueue() {
    let state = Arc::new(session(100));
    let worker = {
        let state = state.clone();
        tokio::spawn(async move { state.next_batch(5).await.map(|batch| batch.len()) })
    };
    tokio::task::yield_now().await;

    state.enqueue_requests(vec![request(1), request(2)]).await;
    assert_eq!(worker.await.unwrap(), Some(2));
}

#[tokio::test]
async fn test_subscribers_see_completion() {
    let state = session(100);
    let storage = InMemoryWorldStateStorage::new();
    let (root, header) = root_node();
    let mut progress = state.subscribe();

    state.set_root_node_data(root);
    assert!(state.check_completion(&storage, &header));

    progress.changed().await.unwrap();
    assert_eq!(progress.borrow().status, DownloadStatus::Completed);
}

#[test]
fn test_failure_is_final() {
    let state = session(100);
    state.fail(WorldStateSyncError::Internal("boom".into()));
    state.cancel();
    assert!(matches!(state.status(), DownloadStatus::Failed(_)));
    assert!(state.progress().status.is_finished());
}
