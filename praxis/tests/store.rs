//! Thought-store lifecycle tests: status machines, ponder bounds, cascade
//! deletes, and queue ordering.

use praxis::store::model::{Task, TaskContext, Thought};
use praxis::store::{StoreError, ThoughtStore};
use praxis::types::{TaskStatus, ThoughtStatus};
use tempfile::TempDir;

async fn open_store(dir: &TempDir) -> ThoughtStore {
    let migrations = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    ThoughtStore::open(&dir.path().join("engine.db"), &migrations, 7, 7)
        .await
        .expect("open store")
}

fn task(channel: &str, priority: i32) -> Task {
    Task::new(channel, "test work", priority, TaskContext::default())
}

#[tokio::test]
async fn task_round_trips_through_the_store() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let task = task("c1", 3);
    store.add_task(&task).await.unwrap();
    let loaded = store.get_task(&task.task_id).await.unwrap().unwrap();
    assert_eq!(loaded, task);
}

#[tokio::test]
async fn thought_status_walks_the_machine() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let task = task("c1", 0);
    store.add_task(&task).await.unwrap();
    let thought = Thought::seed(&task, "think");
    store.add_thought(&thought).await.unwrap();

    store.mark_processing(&thought.thought_id, 1).await.unwrap();
    assert_eq!(
        store.thought_status(&thought.thought_id).await.unwrap(),
        ThoughtStatus::Processing
    );

    store
        .update_thought_status(&thought.thought_id, ThoughtStatus::Completed, None)
        .await
        .unwrap();

    // Terminal: no further transitions.
    let err = store
        .update_thought_status(&thought.thought_id, ThoughtStatus::Pending, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::IllegalTransition { .. }));
}

#[tokio::test]
async fn pending_thought_cannot_jump_to_completed() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let task = task("c1", 0);
    store.add_task(&task).await.unwrap();
    let thought = Thought::seed(&task, "think");
    store.add_thought(&thought).await.unwrap();

    let err = store
        .update_thought_status(&thought.thought_id, ThoughtStatus::Completed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::IllegalTransition { .. }));
}

#[tokio::test]
async fn ponder_requeue_counts_and_caps() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let task = task("c1", 0);
    store.add_task(&task).await.unwrap();
    let thought = Thought::seed(&task, "keep thinking");
    store.add_thought(&thought).await.unwrap();

    for expected in 1..=7u32 {
        store
            .mark_processing(&thought.thought_id, expected)
            .await
            .unwrap();
        let count = store
            .requeue_ponder(&thought.thought_id, &[format!("question {expected}")])
            .await
            .unwrap();
        assert_eq!(count, expected);
    }

    // At the cap: the eighth requeue is rejected.
    store.mark_processing(&thought.thought_id, 8).await.unwrap();
    let err = store
        .requeue_ponder(&thought.thought_id, &["one more?".into()])
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PonderCapExceeded { cap: 7, .. }));

    let loaded = store.get_thought(&thought.thought_id).await.unwrap().unwrap();
    assert_eq!(loaded.ponder_count, 7);
    assert_eq!(loaded.ponder_notes.unwrap().len(), 7);
}

#[tokio::test]
async fn depth_bound_rejects_deep_follow_ups() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let task = task("c1", 0);
    store.add_task(&task).await.unwrap();
    let mut current = Thought::seed(&task, "level 0");
    store.add_thought(&current).await.unwrap();

    for level in 1..=7u32 {
        current = Thought::follow_up(&current, &format!("level {level}"));
        store.add_thought(&current).await.unwrap();
    }

    let too_deep = Thought::follow_up(&current, "level 8");
    let err = store.add_thought(&too_deep).await.unwrap_err();
    assert!(matches!(err, StoreError::DepthExceeded { depth: 8, max: 7 }));
}

#[tokio::test]
async fn cascade_delete_is_transactional_and_complete() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let task = task("c1", 0);
    store.add_task(&task).await.unwrap();
    let thought = Thought::seed(&task, "to be deleted");
    store.add_thought(&thought).await.unwrap();

    let deleted = store
        .delete_tasks(std::slice::from_ref(&task.task_id), true)
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert!(store.get_task(&task.task_id).await.unwrap().is_none());
    assert!(store.get_thought(&thought.thought_id).await.unwrap().is_none());
}

#[tokio::test]
async fn round_queue_orders_by_priority_then_age() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let low = task("c1", 1);
    let high = task("c2", 9);
    store.add_task(&low).await.unwrap();
    store.add_task(&high).await.unwrap();
    let low_thought = Thought::seed(&low, "low priority");
    let high_thought = Thought::seed(&high, "high priority");
    store.add_thought(&low_thought).await.unwrap();
    store.add_thought(&high_thought).await.unwrap();

    let queue = store.round_queue(10).await.unwrap();
    assert_eq!(queue[0].thought_id, high_thought.thought_id);
    assert_eq!(queue[1].thought_id, low_thought.thought_id);
}

#[tokio::test]
async fn queue_status_counts_by_state() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let task = task("c1", 0);
    store.add_task(&task).await.unwrap();
    let first = Thought::seed(&task, "a");
    let second = Thought::seed(&task, "b");
    store.add_thought(&first).await.unwrap();
    store.add_thought(&second).await.unwrap();
    store.mark_processing(&first.thought_id, 1).await.unwrap();

    let status = store.queue_status().await.unwrap();
    assert_eq!(status.pending_tasks, 1);
    assert_eq!(status.pending_thoughts, 1);
    assert_eq!(status.processing_thoughts, 1);
    assert_eq!(status.total_thoughts, 2);
    assert_eq!(store.count_pending_thoughts().await.unwrap(), 2);
}

#[tokio::test]
async fn task_machine_rejects_skipping_active() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir).await;

    let task = task("c1", 0);
    store.add_task(&task).await.unwrap();
    let err = store
        .update_task_status(&task.task_id, TaskStatus::Completed, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::IllegalTransition { .. }));

    store
        .update_task_status(&task.task_id, TaskStatus::Active, None)
        .await
        .unwrap();
    store
        .update_task_status(&task.task_id, TaskStatus::Completed, None)
        .await
        .unwrap();
    assert_eq!(
        store.task_status(&task.task_id).await.unwrap(),
        TaskStatus::Completed
    );
}
