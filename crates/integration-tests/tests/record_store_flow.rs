//! Registry + worker pool driving the in-memory record store

use deferq_core::domain::QueueOptions;
use deferq_core::{QueueEvent, QueueRegistry, QueueStats, RegistryConfig, TaskStatus, WorkerOptions};
use deferq_infra_fs::JsonFileQueueStore;
use deferq_infra_records::InMemoryRecordStore;
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn fast_worker() -> WorkerOptions {
    WorkerOptions {
        idle_poll_interval_ms: 10,
        busy_poll_interval_ms: 5,
        drain_poll_interval_ms: 5,
        error_backoff_ms: 10,
        execution_timeout_ms: None,
    }
}

async fn setup(dir: &TempDir, max_retries: u32) -> (QueueRegistry, Arc<InMemoryRecordStore>) {
    let records = Arc::new(InMemoryRecordStore::new(["Teacher", "Classroom"]));
    let registry = QueueRegistry::new(
        Arc::new(JsonFileQueueStore::new(dir.path())),
        records.clone(),
        RegistryConfig {
            max_retries,
            ..Default::default()
        },
    );
    registry.create_queue("sync", QueueOptions::default()).await.unwrap();
    (registry, records)
}

async fn wait_for_stats(registry: &QueueRegistry, done: impl Fn(&QueueStats) -> bool) -> QueueStats {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = registry.stats("sync").await.unwrap();
            if done(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_helpers_apply_in_order() {
    let dir = TempDir::new().unwrap();
    let (registry, records) = setup(&dir, 3).await;

    registry
        .save_record("sync", "Teacher", json!({"name": "Ana", "dept": "math"}), Map::new())
        .await
        .unwrap();
    registry
        .bulk_save(
            "sync",
            "Teacher",
            vec![json!({"name": "Luis", "dept": "math"}), json!({"name": "Eva", "dept": "art"})],
            Map::new(),
        )
        .await
        .unwrap();
    registry
        .update_record("sync", "Teacher", json!(1), json!({"name": "Ana Maria"}), Map::new())
        .await
        .unwrap();
    registry
        .bulk_update("sync", "Teacher", json!({"dept": "math"}), json!({"floor": 2}), Map::new())
        .await
        .unwrap();
    registry
        .delete_record("sync", "Teacher", json!(3), Map::new())
        .await
        .unwrap();

    // One context keeps submission order
    registry.create_worker("sync", 1, fast_worker()).await.unwrap();
    wait_for_stats(&registry, |s| s.completed == 5).await;
    registry.shutdown().await;

    assert_eq!(
        records.rows("Teacher").await,
        vec![
            json!({"id": 1, "name": "Ana Maria", "dept": "math", "floor": 2}),
            json!({"id": 2, "name": "Luis", "dept": "math", "floor": 2}),
        ]
    );
}

#[tokio::test]
async fn test_unknown_entity_is_terminal_error() {
    let dir = TempDir::new().unwrap();
    let (registry, _records) = setup(&dir, 3).await;
    let mut events = registry.subscribe();

    let task_id = registry
        .save_record("sync", "Spaceship", json!({"name": "x"}), Map::new())
        .await
        .unwrap();
    registry.create_worker("sync", 1, fast_worker()).await.unwrap();
    wait_for_stats(&registry, |s| s.error == 1).await;

    let task = registry.get_task("sync", &task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.retry_count, 1);
    assert!(task.error.unwrap().contains("Spaceship"));

    let mut saw_error = false;
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::TaskError { queue, task_id: id, .. } = event {
            assert_eq!(queue, "sync");
            assert_eq!(id, task_id);
            saw_error = true;
        }
    }
    assert!(saw_error);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_outage_is_retried_then_recovers() {
    let dir = TempDir::new().unwrap();
    let (registry, records) = setup(&dir, 1000).await;
    let mut events = registry.subscribe();
    records.set_available(false);

    let task_id = registry
        .save_record("sync", "Classroom", json!({"code": "B-12"}), Map::new())
        .await
        .unwrap();
    registry.create_worker("sync", 1, fast_worker()).await.unwrap();

    // Wait for the first failed attempt, then bring the store back
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(QueueEvent::TaskFailed { retry, .. }) = events.recv().await {
                assert!(retry);
                break;
            }
        }
    })
    .await
    .unwrap();
    records.set_available(true);

    wait_for_stats(&registry, |s| s.completed == 1).await;
    let task = registry.get_task("sync", &task_id).await.unwrap();
    assert!(task.retry_count >= 1);
    assert_eq!(records.count("Classroom").await, 1);
    registry.shutdown().await;
}

#[tokio::test]
async fn test_persistent_outage_fails_task() {
    let dir = TempDir::new().unwrap();
    let (registry, records) = setup(&dir, 3).await;
    records.set_available(false);

    let task_id = registry
        .save_record("sync", "Classroom", json!({"code": "B-12"}), Map::new())
        .await
        .unwrap();
    registry.create_worker("sync", 1, fast_worker()).await.unwrap();
    wait_for_stats(&registry, |s| s.failed == 1).await;

    let task = registry.get_task("sync", &task_id).await.unwrap();
    assert_eq!(task.retry_count, 3);
    assert!(task.error.unwrap().contains("unavailable"));
    registry.shutdown().await;
}
