// Queue Registry - process-wide directory of queues and worker pools

use crate::application::enqueue::{validate_queue_name, EnqueueRequest};
use crate::application::events::{EventBus, DEFAULT_EVENT_CAPACITY};
use crate::application::queue::{Queue, QueueContext};
use crate::application::worker::{WorkerId, WorkerInfo, WorkerOptions, WorkerPool};
use crate::domain::{
    Operation, QueueConfig, QueueEvent, QueueOptions, QueueStats, RetentionPolicy, Task,
    TaskFilter, TaskId, DEFAULT_MAX_RETRIES,
};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, QueueStore, TaskExecutor, TimeProvider};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::{debug, error, info, warn};

/// Defaults applied to every queue the registry creates or loads
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub max_retries: u32,
    pub retention: RetentionPolicy,
    /// Events buffered per subscriber
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retention: RetentionPolicy::unbounded(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Ready,
    ShutDown,
}

pub struct QueueRegistry {
    config: RegistryConfig,
    ctx: QueueContext,
    executor: Arc<dyn TaskExecutor>,
    queues: RwLock<HashMap<String, Arc<Queue>>>,
    pools: Mutex<HashMap<WorkerId, Arc<WorkerPool>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl QueueRegistry {
    pub fn new(
        store: Arc<dyn QueueStore>,
        executor: Arc<dyn TaskExecutor>,
        config: RegistryConfig,
    ) -> Self {
        let mut ctx = QueueContext::new(store);
        ctx.events = EventBus::new(config.event_capacity);
        Self {
            config,
            ctx,
            executor,
            queues: RwLock::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
        }
    }

    /// Replace the ID generator (tests use sequential IDs)
    pub fn with_id_provider(mut self, id_provider: Arc<dyn IdProvider>) -> Self {
        self.ctx.id_provider = id_provider;
        self
    }

    pub fn with_time_provider(mut self, time_provider: Arc<dyn TimeProvider>) -> Self {
        self.ctx.time_provider = time_provider;
        self
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Prepare the persistence root and load every persisted queue.
    ///
    /// Idempotent once it has succeeded. Fails after `shutdown`.
    pub async fn initialize(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Ready => return Ok(()),
            Lifecycle::ShutDown => {
                return Err(AppError::InvalidState("registry has been shut down".into()))
            }
            Lifecycle::Uninitialized => {}
        }

        self.ctx.store.prepare().await?;
        let names = self.ctx.store.list_queues().await?;

        let mut queues = self.queues.write().await;
        let mut loaded = Vec::with_capacity(names.len());
        for name in names {
            if queues.contains_key(&name) {
                continue;
            }
            if let Err(e) = validate_queue_name(&name) {
                warn!(queue = %name, error = %e, "Skipping persisted queue with invalid name");
                continue;
            }
            let queue = self.build_queue(&name, &QueueOptions::default())?;
            queue.initialize().await?;
            loaded.push((name, Arc::new(queue)));
        }
        // All or nothing: a corrupt queue leaves the registry uninitialized
        queues.extend(loaded);

        *lifecycle = Lifecycle::Ready;
        info!(queues = queues.len(), "Queue registry initialized");
        Ok(())
    }

    /// Register a queue, or return the one already registered under `name`
    pub async fn create_queue(&self, name: &str, options: QueueOptions) -> Result<Arc<Queue>> {
        self.ensure_ready().await?;
        validate_queue_name(name)?;

        let mut queues = self.queues.write().await;
        let registered = queues.get(name).cloned();
        if let Some(existing) = registered {
            drop(queues);
            if existing.reconfigure(&options).await {
                warn!(queue = %name, "Queue already registered; applied the new options");
            } else {
                debug!(queue = %name, "Queue already registered");
            }
            return Ok(existing);
        }

        let queue = self.build_queue(name, &options)?;
        // Picks up a file left behind by an earlier delete_queue
        queue.initialize().await?;
        // Explicit options win over settings stored in that file
        queue.reconfigure(&options).await;
        let queue = Arc::new(queue);
        queues.insert(name.to_string(), Arc::clone(&queue));

        info!(queue = %name, max_retries = queue.config().await.max_retries, "Queue created");
        Ok(queue)
    }

    pub async fn get_queue(&self, name: &str) -> Option<Arc<Queue>> {
        self.queues.read().await.get(name).cloned()
    }

    pub async fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.queues.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop the queue's pools, flush it and deregister it. The persisted file
    /// is kept. Returns `false` if no such queue was registered.
    pub async fn delete_queue(&self, name: &str) -> Result<bool> {
        // Deregister under the pools lock so create_worker cannot bind a new
        // pool to the queue in between
        let (queue, bound) = {
            let mut pools = self.pools.lock().await;
            let Some(queue) = self.queues.write().await.remove(name) else {
                return Ok(false);
            };
            let ids: Vec<WorkerId> = pools
                .iter()
                .filter(|(_, pool)| pool.queue_name() == name)
                .map(|(id, _)| id.clone())
                .collect();
            let bound: Vec<Arc<WorkerPool>> = ids.iter().filter_map(|id| pools.remove(id)).collect();
            (queue, bound)
        };
        join_all(bound.iter().map(|pool| pool.stop())).await;
        queue.flush().await?;

        info!(queue = %name, stopped_workers = bound.len(), "Queue deleted");
        Ok(true)
    }

    /// Start a pool of `concurrency` execution contexts on a registered queue
    pub async fn create_worker(
        &self,
        queue_name: &str,
        concurrency: usize,
        options: WorkerOptions,
    ) -> Result<WorkerId> {
        self.ensure_ready().await?;
        // Held until the pool is registered; see delete_queue
        let mut pools = self.pools.lock().await;
        let queue = self.require_queue(queue_name).await?;

        let worker_id = format!("{}_worker_{}", queue_name, self.ctx.id_provider.generate_id());
        let pool = Arc::new(WorkerPool::new(
            worker_id.clone(),
            queue,
            Arc::clone(&self.executor),
            concurrency,
            options,
        )?);
        pool.start().await;
        pools.insert(worker_id.clone(), pool);
        drop(pools);

        info!(worker_id = %worker_id, queue = %queue_name, concurrency, "Worker created");
        Ok(worker_id)
    }

    /// Stop and deregister a pool. Returns `false` for an unknown id.
    pub async fn stop_worker(&self, worker_id: &str) -> bool {
        let Some(pool) = self.pools.lock().await.remove(worker_id) else {
            debug!(worker_id = %worker_id, "Stop requested for unknown worker");
            return false;
        };
        pool.stop().await;
        info!(worker_id = %worker_id, "Worker stopped");
        true
    }

    pub async fn worker_info(&self, worker_id: &str) -> Result<WorkerInfo> {
        let pool = self
            .pools
            .lock()
            .await
            .get(worker_id)
            .cloned()
            .ok_or_else(|| AppError::WorkerNotFound(worker_id.to_string()))?;
        Ok(pool.info().await)
    }

    pub async fn list_workers(&self) -> Vec<WorkerInfo> {
        let pools: Vec<Arc<WorkerPool>> = self.pools.lock().await.values().cloned().collect();
        let mut infos = join_all(pools.iter().map(|pool| pool.info())).await;
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Submit a task to a registered queue
    pub async fn enqueue(&self, queue_name: &str, req: EnqueueRequest) -> Result<TaskId> {
        self.require_queue(queue_name).await?.enqueue(req).await
    }

    pub async fn save_record(
        &self,
        queue_name: &str,
        entity_kind: &str,
        data: Value,
        options: Map<String, Value>,
    ) -> Result<TaskId> {
        self.submit(queue_name, entity_kind, Operation::Create, data, options)
            .await
    }

    pub async fn update_record(
        &self,
        queue_name: &str,
        entity_kind: &str,
        id: Value,
        data: Value,
        options: Map<String, Value>,
    ) -> Result<TaskId> {
        let payload = json!({ "id": id, "data": data });
        self.submit(queue_name, entity_kind, Operation::Update, payload, options)
            .await
    }

    pub async fn delete_record(
        &self,
        queue_name: &str,
        entity_kind: &str,
        id: Value,
        options: Map<String, Value>,
    ) -> Result<TaskId> {
        let payload = json!({ "id": id });
        self.submit(queue_name, entity_kind, Operation::Delete, payload, options)
            .await
    }

    pub async fn bulk_save(
        &self,
        queue_name: &str,
        entity_kind: &str,
        records: Vec<Value>,
        options: Map<String, Value>,
    ) -> Result<TaskId> {
        let payload = json!({ "records": records });
        self.submit(queue_name, entity_kind, Operation::BulkCreate, payload, options)
            .await
    }

    pub async fn bulk_update(
        &self,
        queue_name: &str,
        entity_kind: &str,
        filter: Value,
        data: Value,
        options: Map<String, Value>,
    ) -> Result<TaskId> {
        let payload = json!({ "where": filter, "data": data });
        self.submit(queue_name, entity_kind, Operation::BulkUpdate, payload, options)
            .await
    }

    pub async fn bulk_delete(
        &self,
        queue_name: &str,
        entity_kind: &str,
        filter: Value,
        options: Map<String, Value>,
    ) -> Result<TaskId> {
        let payload = json!({ "where": filter });
        self.submit(queue_name, entity_kind, Operation::BulkDelete, payload, options)
            .await
    }

    pub async fn stats(&self, queue_name: &str) -> Option<QueueStats> {
        let queue = self.get_queue(queue_name).await?;
        Some(queue.stats().await)
    }

    pub async fn all_stats(&self) -> BTreeMap<String, QueueStats> {
        let queues: Vec<Arc<Queue>> = self.queues.read().await.values().cloned().collect();
        let mut all = BTreeMap::new();
        for queue in queues {
            all.insert(queue.name().to_string(), queue.stats().await);
        }
        all
    }

    pub async fn get_task(&self, queue_name: &str, task_id: &str) -> Result<Task> {
        self.require_queue(queue_name)
            .await?
            .get_task(task_id)
            .await
            .ok_or_else(|| AppError::TaskNotFound(format!("{} in queue {}", task_id, queue_name)))
    }

    pub async fn list_tasks(&self, queue_name: &str, filter: &TaskFilter) -> Result<Vec<Task>> {
        Ok(self.require_queue(queue_name).await?.list_tasks(filter).await)
    }

    /// Requeue tasks left in `processing` by a previous process, on every queue
    pub async fn recover_orphaned(&self) -> Result<usize> {
        let queues: Vec<Arc<Queue>> = self.queues.read().await.values().cloned().collect();
        let mut recovered = 0;
        for queue in queues {
            recovered += queue.recover_orphaned().await?;
        }
        Ok(recovered)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.ctx.events.subscribe()
    }

    /// Stop every pool (waiting for drains), flush every queue, clear both
    /// directories. Later calls are no-ops.
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if *lifecycle == Lifecycle::ShutDown {
            return;
        }
        info!("Shutting down queue registry");

        let (pools, queues) = {
            let mut pools = self.pools.lock().await;
            let queues: Vec<Arc<Queue>> = self.queues.write().await.drain().map(|(_, q)| q).collect();
            let pools: Vec<Arc<WorkerPool>> = pools.drain().map(|(_, p)| p).collect();
            (pools, queues)
        };
        join_all(pools.iter().map(|pool| pool.stop())).await;

        for queue in &queues {
            if let Err(e) = queue.flush().await {
                error!(queue = %queue.name(), error = %e, "Failed to flush queue during shutdown");
            }
        }

        *lifecycle = Lifecycle::ShutDown;
        info!(
            workers = pools.len(),
            queues = queues.len(),
            "Queue registry shut down"
        );
    }

    async fn ensure_ready(&self) -> Result<()> {
        let lifecycle = *self.lifecycle.lock().await;
        match lifecycle {
            Lifecycle::Ready => Ok(()),
            Lifecycle::Uninitialized => self.initialize().await,
            Lifecycle::ShutDown => Err(AppError::InvalidState(
                "registry has been shut down".into(),
            )),
        }
    }

    async fn require_queue(&self, name: &str) -> Result<Arc<Queue>> {
        self.get_queue(name)
            .await
            .ok_or_else(|| AppError::QueueNotFound(name.to_string()))
    }

    async fn submit(
        &self,
        queue_name: &str,
        entity_kind: &str,
        operation: Operation,
        payload: Value,
        options: Map<String, Value>,
    ) -> Result<TaskId> {
        let req = EnqueueRequest::new(entity_kind, operation.as_str(), payload).with_options(options);
        self.enqueue(queue_name, req).await
    }

    fn build_queue(&self, name: &str, options: &QueueOptions) -> Result<Queue> {
        let config = QueueConfig::new(name)
            .with_max_retries(options.max_retries.unwrap_or(self.config.max_retries))
            .with_retention(
                options
                    .retention
                    .clone()
                    .unwrap_or_else(|| self.config.retention.clone()),
            );
        Queue::new(config, self.ctx.clone())
    }
}
