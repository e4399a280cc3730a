//! Tests for the task queue

use protocore_state_sync::{InMemoryTaskQueue, NodeDataRequest, StandaloneTask, Task};
use protocore_types::H256;

fn request(n: u8) -> NodeDataRequest {
    NodeDataRequest::account_trie_node(H256::keccak256(&[n]))
}

#[test]
fn test_dequeue_in_fifo_order() {
    let queue = InMemoryTaskQueue::new();
    assert_eq!(queue.enqueue((0..5).map(request)), 5);

    let batch = queue.dequeue_batch(3);
    let hashes: Vec<_> = batch.iter().map(|t| t.data().hash()).collect();
    assert_eq!(hashes, (0..3).map(|n| request(n).hash()).collect::<Vec<_>>());
    assert_eq!(queue.size(), 2);
    assert_eq!(queue.outstanding(), 3);
    assert!(!queue.all_tasks_completed());
}

#[test]
fn test_completed_task_releases_slot() {
    let queue = InMemoryTaskQueue::new();
    queue.enqueue([request(1)]);

    let mut task = queue.dequeue().unwrap();
    task.mark_completed();

    assert!(task.is_completed());
    assert!(!task.is_failed());
    assert_eq!(queue.outstanding(), 0);
    assert_eq!(queue.completed_count(), 1);
    assert!(queue.all_tasks_completed());
}

#[test]
fn test_failed_task_retried_first() {
    let queue = InMemoryTaskQueue::new();
    queue.enqueue([request(1), request(2)]);

    let mut task = queue.dequeue().unwrap();
    let data = bytes::Bytes::from_static(&[1]);
    task.data_mut().set_data(data).unwrap();
    task.mark_failed();

    assert!(task.is_failed());
    assert_eq!(queue.outstanding(), 0);
    assert_eq!(queue.retried_count(), 1);

    let pending = queue.pending_requests();
    assert_eq!(pending, vec![request(1), request(2)]);
    assert!(!pending[0].has_data());
}

#[test]
fn test_task_ends_only_once() {
    let queue = InMemoryTaskQueue::new();
    queue.enqueue([request(1)]);

    let mut task = queue.dequeue().unwrap();
    task.mark_completed();
    task.mark_failed();
    task.mark_completed();

    assert!(task.is_completed());
    assert!(!task.is_failed());
    assert_eq!(queue.completed_count(), 1);
    assert_eq!(queue.size(), 0);
}

#[test]
fn test_dropped_task_is_retried() {
    let queue = InMemoryTaskQueue::new();
    queue.enqueue([request(1)]);

    drop(queue.dequeue_batch(10));

    assert_eq!(queue.outstanding(), 0);
    assert_eq!(queue.pending_requests(), vec![request(1)]);
}

#[test]
fn test_closed_queue_discards_work() {
    let queue = InMemoryTaskQueue::new();
    queue.enqueue([request(1), request(2)]);
    let mut task = queue.dequeue().unwrap();

    queue.close();
    assert!(queue.is_closed());
    assert_eq!(queue.size(), 0);
    assert_eq!(queue.enqueue([request(3)]), 0);
    assert!(queue.dequeue().is_none());

    task.mark_failed();
    assert_eq!(queue.size(), 0);
    assert_eq!(queue.outstanding(), 0);
}

#[test]
fn test_standalone_task_transitions() {
    let mut task = StandaloneTask::new(request(1));
    assert!(!task.is_completed() && !task.is_failed());

    task.mark_failed();
    task.mark_completed();
    assert!(task.is_failed());
    assert!(!task.is_completed());
}
