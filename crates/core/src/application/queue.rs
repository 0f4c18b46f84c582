// Queue - pending FIFO plus full task history, persisted as whole snapshots

use crate::application::enqueue::{validate_queue_name, validate_request, EnqueueRequest};
use crate::application::events::EventBus;
use crate::domain::{
    QueueConfig, QueueEvent, QueueName, QueueOptions, QueueSnapshot, QueueStats, Task, TaskFilter,
    TaskId, TaskStatus,
};
use crate::error::{AppError, Result};
use crate::port::id_provider::UuidProvider;
use crate::port::time_provider::SystemTimeProvider;
use crate::port::{IdProvider, QueueStore, TimeProvider};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Collaborators shared by every queue of a registry
#[derive(Clone)]
pub struct QueueContext {
    pub store: Arc<dyn QueueStore>,
    pub id_provider: Arc<dyn IdProvider>,
    pub time_provider: Arc<dyn TimeProvider>,
    pub events: EventBus,
}

impl QueueContext {
    /// Production wiring: UUID ids, system clock, fresh event bus
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self {
            store,
            id_provider: Arc::new(UuidProvider),
            time_provider: Arc::new(SystemTimeProvider),
            events: EventBus::default(),
        }
    }
}

struct QueueState {
    /// Travels with every snapshot so a reload keeps per-queue settings
    config: QueueConfig,
    pending: VecDeque<TaskId>,
    history: HashMap<TaskId, Task>,
    /// Bumped on every mutation; orders snapshots on their way to the store
    version: u64,
}

impl QueueState {
    fn new(config: QueueConfig) -> Self {
        Self {
            config,
            pending: VecDeque::new(),
            history: HashMap::new(),
            version: 0,
        }
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            name: self.config.name.clone(),
            max_retries: Some(self.config.max_retries),
            retention: Some(self.config.retention.clone()),
            pending: self
                .pending
                .iter()
                .filter_map(|id| self.history.get(id).cloned())
                .collect(),
            history: self
                .history
                .iter()
                .map(|(id, task)| (id.clone(), task.clone()))
                .collect(),
        }
    }

    /// Rebuild state from a snapshot. Settings stored in the snapshot take
    /// precedence over `config`; files written without them keep `config`.
    fn restore(snapshot: QueueSnapshot, mut config: QueueConfig) -> Result<Self> {
        if let Some(max_retries) = snapshot.max_retries {
            config.max_retries = max_retries;
        }
        if let Some(retention) = snapshot.retention {
            config.retention = retention;
        }
        let mut history: HashMap<TaskId, Task> = snapshot.history.into_iter().collect();
        let mut pending = VecDeque::with_capacity(snapshot.pending.len());
        let mut seen = HashSet::new();

        for task in snapshot.pending {
            let id = task.id.clone();
            if !seen.insert(id.clone()) {
                return Err(AppError::Persistence(format!(
                    "task {} appears twice in the pending list",
                    id
                )));
            }
            let status = history.entry(id.clone()).or_insert(task).status;
            if status != TaskStatus::Pending {
                return Err(AppError::Persistence(format!(
                    "pending task {} has status {} in history",
                    id, status
                )));
            }
            pending.push_back(id);
        }

        Ok(Self {
            config,
            pending,
            history,
            version: 0,
        })
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut Task> {
        self.history
            .get_mut(task_id)
            .ok_or_else(|| AppError::TaskNotFound(task_id.to_string()))
    }
}

/// A named, durable queue.
///
/// All mutations are serialized through one lock; the snapshot produced by a
/// mutation is written to the store after the lock is released, and a
/// snapshot never overwrites a newer one.
pub struct Queue {
    name: QueueName,
    ctx: QueueContext,
    state: Mutex<QueueState>,
    /// Version of the newest snapshot that reached the store
    persisted_version: Mutex<u64>,
}

impl Queue {
    pub fn new(config: QueueConfig, ctx: QueueContext) -> Result<Self> {
        validate_queue_name(&config.name)?;
        Ok(Self {
            name: config.name.clone(),
            ctx,
            state: Mutex::new(QueueState::new(config)),
            persisted_version: Mutex::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn config(&self) -> QueueConfig {
        self.state.lock().await.config.clone()
    }

    /// Apply the overrides set in `options`, persisting the change.
    ///
    /// Returns `true` when the effective configuration changed.
    pub async fn reconfigure(&self, options: &QueueOptions) -> bool {
        let (snapshot, version) = {
            let mut state = self.state.lock().await;
            let mut config = state.config.clone();
            if let Some(max_retries) = options.max_retries {
                config.max_retries = max_retries;
            }
            if let Some(retention) = &options.retention {
                config.retention = retention.clone();
            }
            if config == state.config {
                return false;
            }
            info!(
                queue = %self.name(),
                max_retries = config.max_retries,
                "Queue reconfigured"
            );
            state.config = config;
            self.seal(&mut state)
        };
        self.persist(snapshot, version).await;
        true
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    /// Load persisted state, if any.
    ///
    /// A queue with nothing persisted starts empty. Any other read or parse
    /// failure is returned and the in-memory state is left untouched.
    pub async fn initialize(&self) -> Result<()> {
        let name = self.name();
        let Some(snapshot) = self.ctx.store.load(name).await? else {
            info!(queue = %name, "No persisted state (first run)");
            return Ok(());
        };
        if snapshot.name != name {
            return Err(AppError::Persistence(format!(
                "persisted state for {} names queue {}",
                name, snapshot.name
            )));
        }

        let mut state = self.state.lock().await;
        let restored = QueueState::restore(snapshot, state.config.clone())?;
        info!(
            queue = %name,
            pending = restored.pending.len(),
            history = restored.history.len(),
            "Loaded persisted queue"
        );
        *state = restored;
        Ok(())
    }

    /// Validate and append a new task; returns its ID
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<TaskId> {
        let operation = validate_request(&req)?;
        let task_id = self.ctx.id_provider.generate_id();
        let now = self.ctx.time_provider.now_millis();
        let task = req.into_task(task_id.clone(), now, self.name(), operation);

        let (snapshot, version) = {
            let mut state = self.state.lock().await;
            if state.history.contains_key(&task_id) {
                return Err(AppError::Internal(format!("duplicate task id {}", task_id)));
            }
            state.pending.push_back(task_id.clone());
            state.history.insert(task_id.clone(), task);
            self.seal(&mut state)
        };
        self.persist(snapshot, version).await;

        info!(queue = %self.name(), task_id = %task_id, operation = %operation, "Task enqueued");
        self.ctx.events.publish(QueueEvent::TaskEnqueued {
            queue: self.name().to_string(),
            task_id: task_id.clone(),
        });
        Ok(task_id)
    }

    /// Pop the head of the pending list and mark it Processing.
    ///
    /// `Ok(None)` means there is nothing to do right now.
    pub async fn dequeue(&self) -> Result<Option<Task>> {
        let now = self.ctx.time_provider.now_millis();
        let (task, snapshot, version) = {
            let mut state = self.state.lock().await;
            let Some(task_id) = state.pending.pop_front() else {
                return Ok(None);
            };
            let task = state.task_mut(&task_id)?;
            task.start(now)?;
            let task = task.clone();
            let (snapshot, version) = self.seal(&mut state);
            (task, snapshot, version)
        };
        self.persist(snapshot, version).await;

        debug!(queue = %self.name(), task_id = %task.id, "Task dequeued");
        self.ctx.events.publish(QueueEvent::TaskDequeued {
            queue: self.name().to_string(),
            task_id: task.id.clone(),
        });
        Ok(Some(task))
    }

    /// Move a Processing task into a terminal status.
    ///
    /// Returns `Ok(false)` when no such task exists. Asking for a transition the
    /// state machine forbids is an error.
    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<bool> {
        let now = self.ctx.time_provider.now_millis();
        let (snapshot, version, evicted) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let Some(task) = state.history.get_mut(task_id) else {
                return Ok(false);
            };
            task.finish(status, now, result, error)?;
            let evicted = state.config.retention.prune(&mut state.history, now);
            let (snapshot, version) = self.seal(state);
            (snapshot, version, evicted)
        };
        self.persist(snapshot, version).await;

        info!(queue = %self.name(), task_id = %task_id, status = %status, "Task status updated");
        self.log_evictions(&evicted);
        Ok(true)
    }

    /// Record a retryable failure of a Processing task.
    ///
    /// Returns `true` when the task went back to the tail of the pending list,
    /// `false` when its attempt budget is spent and it is now `failed` (the
    /// caller must not resubmit it).
    pub async fn requeue_task(&self, task_id: &str, error: Option<String>) -> Result<bool> {
        let now = self.ctx.time_provider.now_millis();
        let (requeued, retry_count, max_retries, snapshot, version, evicted) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            let max_retries = state.config.max_retries;
            let task = state.task_mut(task_id)?;
            let requeued = task.retry(now, error, max_retries)?;
            let retry_count = task.retry_count;

            let evicted = if requeued {
                state.pending.push_back(task_id.to_string());
                Vec::new()
            } else {
                state.config.retention.prune(&mut state.history, now)
            };
            let (snapshot, version) = self.seal(state);
            (requeued, retry_count, max_retries, snapshot, version, evicted)
        };
        self.persist(snapshot, version).await;

        if requeued {
            info!(queue = %self.name(), task_id = %task_id, retry_count, "Task requeued");
        } else {
            warn!(
                queue = %self.name(),
                task_id = %task_id,
                retry_count,
                max_retries,
                "Task failed after max retries"
            );
        }
        self.log_evictions(&evicted);
        Ok(requeued)
    }

    /// Undo a dequeue: the task goes back to the head of the pending list
    /// without counting an attempt
    pub async fn return_to_front(&self, task_id: &str) -> Result<()> {
        let (snapshot, version) = {
            let mut state = self.state.lock().await;
            state.task_mut(task_id)?.release()?;
            state.pending.push_front(task_id.to_string());
            self.seal(&mut state)
        };
        self.persist(snapshot, version).await;
        debug!(queue = %self.name(), task_id = %task_id, "Task returned to head of queue");
        Ok(())
    }

    /// Return every Processing task to the tail of the pending list.
    ///
    /// Meant for startup, when no execution context of this process can own
    /// them; their previous executions died with the previous process.
    pub async fn recover_orphaned(&self) -> Result<usize> {
        let (recovered, sealed) = {
            let mut state = self.state.lock().await;
            let mut orphaned: Vec<(i64, TaskId)> = state
                .history
                .values()
                .filter(|task| task.status == TaskStatus::Processing)
                .map(|task| (task.started_at.unwrap_or(task.created_at), task.id.clone()))
                .collect();
            orphaned.sort();

            for (_, task_id) in &orphaned {
                state.task_mut(task_id)?.release()?;
                state.pending.push_back(task_id.clone());
            }
            let sealed = (!orphaned.is_empty()).then(|| self.seal(&mut state));
            (orphaned.len(), sealed)
        };

        if let Some((snapshot, version)) = sealed {
            self.persist(snapshot, version).await;
            warn!(queue = %self.name(), recovered, "Requeued orphaned processing tasks");
        }
        Ok(recovered)
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.state.lock().await.history.get(task_id).cloned()
    }

    /// Tasks from the history in creation order, filtered and paged
    pub async fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let state = self.state.lock().await;
        let mut matching: Vec<&Task> = state
            .history
            .values()
            .filter(|task| filter.matches(task))
            .collect();
        matching.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.effective_limit())
            .cloned()
            .collect()
    }

    /// Counts per status, computed from the history
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        QueueStats::from_tasks(self.name(), state.history.values())
    }

    /// Pending task IDs, head first
    pub async fn pending_ids(&self) -> Vec<TaskId> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Write the current state to the store, reporting failure to the caller
    pub async fn flush(&self) -> Result<()> {
        let (snapshot, version) = {
            let state = self.state.lock().await;
            (state.snapshot(), state.version)
        };
        self.write_snapshot(&snapshot, version, true).await
    }

    /// Append an id to the pending list without a history entry, leaving the
    /// queue inconsistent so the next dequeue of it fails
    #[cfg(test)]
    pub(crate) async fn push_dangling_pending(&self, task_id: &str) {
        self.state.lock().await.pending.push_back(task_id.to_string());
    }

    fn seal(&self, state: &mut QueueState) -> (QueueSnapshot, u64) {
        state.version += 1;
        (state.snapshot(), state.version)
    }

    /// Best-effort durability: failures are logged, memory stays authoritative
    async fn persist(&self, snapshot: QueueSnapshot, version: u64) {
        if let Err(e) = self.write_snapshot(&snapshot, version, false).await {
            error!(
                queue = %self.name(),
                version,
                error = %e,
                "Failed to persist queue; keeping in-memory state"
            );
        }
    }

    async fn write_snapshot(&self, snapshot: &QueueSnapshot, version: u64, force: bool) -> Result<()> {
        let mut persisted = self.persisted_version.lock().await;
        if !force && *persisted >= version {
            debug!(queue = %self.name(), version, "Skipping stale snapshot");
            return Ok(());
        }
        self.ctx.store.save(snapshot).await?;
        *persisted = (*persisted).max(version);
        Ok(())
    }

    fn log_evictions(&self, evicted: &[TaskId]) {
        if !evicted.is_empty() {
            debug!(queue = %self.name(), evicted = evicted.len(), "Retention evicted terminal tasks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RetentionPolicy;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::queue_store::mocks::InMemoryQueueStore;
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn context(store: Arc<InMemoryQueueStore>) -> QueueContext {
        QueueContext {
            store,
            id_provider: Arc::new(SequentialIdProvider::new("task")),
            time_provider: Arc::new(ManualTimeProvider::new(1_000)),
            events: EventBus::new(64),
        }
    }

    fn queue_with(store: Arc<InMemoryQueueStore>, config: QueueConfig) -> Queue {
        Queue::new(config, context(store)).unwrap()
    }

    fn widget(name: &str) -> EnqueueRequest {
        EnqueueRequest::new("Widget", "create", json!({ "name": name }))
    }

    #[tokio::test]
    async fn test_enqueue_persists_and_counts() {
        let store = Arc::new(InMemoryQueueStore::new());
        let queue = queue_with(store.clone(), QueueConfig::new("q1"));

        let task_id = queue.enqueue(widget("x")).await.unwrap();

        let stats = queue.stats().await;
        assert_eq!(
            stats,
            QueueStats {
                name: "q1".into(),
                total: 1,
                pending: 1,
                ..Default::default()
            }
        );
        assert_eq!(store.save_count(), 1);
        assert!(store.raw("q1").unwrap().contains(&task_id));
    }

    #[tokio::test]
    async fn test_rejected_request_persists_nothing() {
        let store = Arc::new(InMemoryQueueStore::new());
        let queue = queue_with(store.clone(), QueueConfig::new("q1"));

        let result = queue
            .enqueue(EnqueueRequest::new("Widget", "truncate", json!({"a": 1})))
            .await;

        assert!(matches!(result, Err(AppError::UnsupportedOperation(_))));
        assert_eq!(store.save_count(), 0);
        assert_eq!(queue.stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo() {
        let store = Arc::new(InMemoryQueueStore::new());
        let queue = queue_with(store, QueueConfig::new("q1"));

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(queue.enqueue(widget(&format!("w{i}"))).await.unwrap());
        }

        for expected in &ids {
            let task = queue.dequeue().await.unwrap().unwrap();
            assert_eq!(&task.id, expected);
            assert_eq!(task.status, TaskStatus::Processing);
            assert_eq!(task.started_at, Some(1_000));
        }
        assert!(queue.dequeue().await.unwrap().is_none());
        assert_eq!(queue.stats().await.processing, 5);
    }

    #[tokio::test]
    async fn test_update_status_unknown_task() {
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), QueueConfig::new("q1"));
        let updated = queue
            .update_status("missing", TaskStatus::Completed, None, None)
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_update_status_completes_task() {
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), QueueConfig::new("q1"));
        let task_id = queue.enqueue(widget("x")).await.unwrap();
        queue.dequeue().await.unwrap();

        let updated = queue
            .update_status(&task_id, TaskStatus::Completed, Some(json!({"id": 42})), None)
            .await
            .unwrap();
        assert!(updated);

        let task = queue.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"id": 42})));
        assert!(task.completed_at.is_some());

        // Terminal: no further transitions
        assert_err!(
            queue
                .update_status(&task_id, TaskStatus::Error, None, Some("late".into()))
                .await
        );
    }

    #[tokio::test]
    async fn test_requeue_goes_to_tail() {
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), QueueConfig::new("q1"));
        let first = queue.enqueue(widget("a")).await.unwrap();
        let second = queue.enqueue(widget("b")).await.unwrap();

        queue.dequeue().await.unwrap();
        let requeued = queue
            .requeue_task(&first, Some("connection reset".into()))
            .await
            .unwrap();

        assert!(requeued);
        assert_eq!(queue.pending_ids().await, vec![second, first.clone()]);
        let task = queue.get_task(&first).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 1);
        assert_eq!(task.error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn test_requeue_exhausts_retries() {
        let queue = queue_with(
            Arc::new(InMemoryQueueStore::new()),
            QueueConfig::new("q1").with_max_retries(3),
        );
        let task_id = queue.enqueue(widget("x")).await.unwrap();

        let mut attempts = 0;
        while let Some(task) = queue.dequeue().await.unwrap() {
            attempts += 1;
            queue
                .requeue_task(&task.id, Some("timeout".into()))
                .await
                .unwrap();
        }

        assert_eq!(attempts, 3);
        let task = queue.get_task(&task_id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.retry_count, 3);
        assert!(task.completed_at.is_some());
        assert!(queue.pending_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_requeue_unknown_task_is_error() {
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), QueueConfig::new("q1"));
        let result = queue.requeue_task("missing", None).await;
        assert!(matches!(result, Err(AppError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_return_to_front() {
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), QueueConfig::new("q1"));
        let first = queue.enqueue(widget("a")).await.unwrap();
        let second = queue.enqueue(widget("b")).await.unwrap();

        let task = queue.dequeue().await.unwrap().unwrap();
        assert_ok!(queue.return_to_front(&task.id).await);

        assert_eq!(queue.pending_ids().await, vec![first.clone(), second]);
        let task = queue.get_task(&first).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retry_count, 0);
    }

    #[tokio::test]
    async fn test_reload_round_trip() {
        let store = Arc::new(InMemoryQueueStore::new());
        let queue = queue_with(store.clone(), QueueConfig::new("q1"));
        let a = queue.enqueue(widget("a")).await.unwrap();
        queue.enqueue(widget("b")).await.unwrap();
        queue.enqueue(widget("c")).await.unwrap();
        queue.dequeue().await.unwrap();
        queue
            .update_status(&a, TaskStatus::Completed, Some(json!({"id": 1})), None)
            .await
            .unwrap();
        queue.dequeue().await.unwrap();

        let reloaded = queue_with(store, QueueConfig::new("q1"));
        reloaded.initialize().await.unwrap();

        assert_eq!(reloaded.snapshot().await, queue.snapshot().await);
        assert_eq!(reloaded.pending_ids().await, queue.pending_ids().await);
        assert_eq!(reloaded.stats().await, queue.stats().await);
    }

    #[tokio::test]
    async fn test_reload_restores_queue_settings() {
        let store = Arc::new(InMemoryQueueStore::new());
        let source = queue_with(store.clone(), QueueConfig::new("q1").with_max_retries(7));
        source.enqueue(widget("a")).await.unwrap();

        let reloaded = queue_with(store.clone(), QueueConfig::new("q1"));
        reloaded.initialize().await.unwrap();
        assert_eq!(reloaded.config().await.max_retries, 7);

        // Files from before settings were stored keep the configured values
        let mut legacy = source.snapshot().await;
        legacy.max_retries = None;
        legacy.retention = None;
        store.insert_raw("q1", serde_json::to_string(&legacy).unwrap());
        let reloaded = queue_with(store, QueueConfig::new("q1").with_max_retries(4));
        reloaded.initialize().await.unwrap();
        assert_eq!(reloaded.config().await.max_retries, 4);
        assert_eq!(reloaded.stats().await.pending, 1);
    }

    #[tokio::test]
    async fn test_reconfigure_changes_retry_budget() {
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), QueueConfig::new("q1"));
        let task_id = queue.enqueue(widget("a")).await.unwrap();

        assert!(queue.reconfigure(&QueueOptions { max_retries: Some(1), ..Default::default() }).await);
        assert!(!queue.reconfigure(&QueueOptions::default()).await);

        queue.dequeue().await.unwrap();
        assert!(!queue.requeue_task(&task_id, Some("boom".into())).await.unwrap());
        assert_eq!(queue.get_task(&task_id).await.unwrap().status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn test_initialize_without_persisted_state() {
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), QueueConfig::new("fresh"));
        assert_ok!(queue.initialize().await);
        assert_eq!(queue.stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_initialize_rejects_corrupt_state() {
        let store = Arc::new(InMemoryQueueStore::new());
        store.insert_raw("q1", "{ not json");
        let queue = queue_with(store, QueueConfig::new("q1"));

        assert_err!(queue.initialize().await);
        assert_eq!(queue.stats().await.total, 0);
    }

    #[tokio::test]
    async fn test_initialize_rejects_inconsistent_pending() {
        let store = Arc::new(InMemoryQueueStore::new());
        let source = queue_with(store.clone(), QueueConfig::new("q1"));
        source.enqueue(widget("a")).await.unwrap();

        // Hand-edit the file: pending entry whose history copy is already processing
        let mut snapshot = source.snapshot().await;
        for task in snapshot.history.values_mut() {
            task.status = TaskStatus::Processing;
        }
        store.insert_raw("q1", serde_json::to_string(&snapshot).unwrap());

        let queue = queue_with(store, QueueConfig::new("q1"));
        let result = queue.initialize().await;
        assert!(matches!(result, Err(AppError::Persistence(msg)) if msg.contains("status processing")));
    }

    #[tokio::test]
    async fn test_write_failure_keeps_memory_state() {
        let store = Arc::new(InMemoryQueueStore::new());
        store.set_fail_saves(true);
        let queue = queue_with(store.clone(), QueueConfig::new("q1"));

        let task_id = queue.enqueue(widget("x")).await.unwrap();
        assert!(queue.get_task(&task_id).await.is_some());
        assert!(store.raw("q1").is_none());
        assert_err!(queue.flush().await);

        store.set_fail_saves(false);
        assert_ok!(queue.flush().await);
        assert!(store.raw("q1").unwrap().contains(&task_id));
    }

    #[tokio::test]
    async fn test_recover_orphaned() {
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), QueueConfig::new("q1"));
        let a = queue.enqueue(widget("a")).await.unwrap();
        let b = queue.enqueue(widget("b")).await.unwrap();
        let c = queue.enqueue(widget("c")).await.unwrap();
        queue.dequeue().await.unwrap();
        queue.dequeue().await.unwrap();

        assert_eq!(queue.recover_orphaned().await.unwrap(), 2);
        assert_eq!(queue.pending_ids().await.len(), 3);
        assert_eq!(queue.pending_ids().await[0], c);
        for id in [&a, &b] {
            let task = queue.get_task(id).await.unwrap();
            assert_eq!(task.status, TaskStatus::Pending);
            assert_eq!(task.retry_count, 0);
        }
        assert_eq!(queue.recover_orphaned().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_list_tasks_filters_and_pages() {
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), QueueConfig::new("q1"));
        let mut ids = Vec::new();
        for i in 0..4 {
            ids.push(queue.enqueue(widget(&format!("w{i}"))).await.unwrap());
        }
        queue.dequeue().await.unwrap();

        let pending = queue
            .list_tasks(&TaskFilter::with_status(TaskStatus::Pending))
            .await;
        assert_eq!(pending.len(), 3);

        let page = queue
            .list_tasks(&TaskFilter {
                limit: Some(2),
                offset: 1,
                ..Default::default()
            })
            .await;
        let page_ids: Vec<_> = page.into_iter().map(|t| t.id).collect();
        assert_eq!(page_ids, ids[1..3].to_vec());
    }

    #[tokio::test]
    async fn test_retention_evicts_terminal_tasks() {
        let config = QueueConfig::new("q1").with_retention(RetentionPolicy {
            max_terminal_tasks: Some(1),
            ..Default::default()
        });
        let queue = queue_with(Arc::new(InMemoryQueueStore::new()), config);
        let a = queue.enqueue(widget("a")).await.unwrap();
        let b = queue.enqueue(widget("b")).await.unwrap();
        let c = queue.enqueue(widget("c")).await.unwrap();

        for id in [&a, &b] {
            queue.dequeue().await.unwrap();
            queue
                .update_status(id, TaskStatus::Completed, None, None)
                .await
                .unwrap();
        }

        let stats = queue.stats().await;
        assert_eq!(stats.total, 2);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.pending, 1);
        assert!(queue.get_task(&c).await.is_some());
    }

    #[tokio::test]
    async fn test_enqueue_and_dequeue_publish_events() {
        let store = Arc::new(InMemoryQueueStore::new());
        let ctx = context(store);
        let mut events = ctx.events.subscribe();
        let queue = Queue::new(QueueConfig::new("q1"), ctx).unwrap();

        let task_id = queue.enqueue(widget("x")).await.unwrap();
        queue.dequeue().await.unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::TaskEnqueued {
                queue: "q1".into(),
                task_id: task_id.clone()
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            QueueEvent::TaskDequeued {
                queue: "q1".into(),
                task_id
            }
        );
    }

    #[test]
    fn test_invalid_queue_name_rejected() {
        let result = Queue::new(
            QueueConfig::new("../etc"),
            context(Arc::new(InMemoryQueueStore::new())),
        );
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
