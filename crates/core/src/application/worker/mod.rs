// Worker Pool - bounded-concurrency consumer of one queue

pub mod constants;
mod context;
mod dispatcher;
mod options;
mod panic_guard;
mod shutdown;

pub use options::WorkerOptions;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};

use crate::application::queue::Queue;
use crate::error::{AppError, Result};
use crate::port::TaskExecutor;
use context::ExecutionContext;
use dispatcher::{CompletionHandler, Dispatcher, InFlight};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info};

pub type WorkerId = String;

/// Point-in-time view of a pool, for listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerInfo {
    pub id: WorkerId,
    pub queue: String,
    pub concurrency: usize,
    pub running: bool,
    pub in_flight: usize,
}

struct PoolRuntime {
    shutdown: ShutdownSender,
    dispatcher: JoinHandle<()>,
    contexts: Vec<JoinHandle<()>>,
    completions: JoinHandle<()>,
}

/// Consumes one queue with at most `concurrency` tasks executing at once.
///
/// A single dispatcher dequeues and hands tasks to idle execution contexts;
/// a completion handler records each outcome on the queue before the context
/// counts as idle again.
pub struct WorkerPool {
    id: WorkerId,
    queue: Arc<Queue>,
    executor: Arc<dyn TaskExecutor>,
    concurrency: usize,
    options: WorkerOptions,
    running: AtomicBool,
    in_flight: InFlight,
    runtime: Mutex<Option<PoolRuntime>>,
}

impl WorkerPool {
    pub fn new(
        id: impl Into<WorkerId>,
        queue: Arc<Queue>,
        executor: Arc<dyn TaskExecutor>,
        concurrency: usize,
        options: WorkerOptions,
    ) -> Result<Self> {
        if concurrency == 0 {
            return Err(AppError::Validation(
                "worker concurrency must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            id: id.into(),
            queue,
            executor,
            concurrency,
            options,
            running: AtomicBool::new(false),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            runtime: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn queue_name(&self) -> &str {
        self.queue.name()
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    pub async fn info(&self) -> WorkerInfo {
        WorkerInfo {
            id: self.id.clone(),
            queue: self.queue.name().to_string(),
            concurrency: self.concurrency,
            running: self.is_running(),
            in_flight: self.in_flight_count().await,
        }
    }

    /// Spawn the execution contexts and the dispatcher. No-op when running.
    pub async fn start(&self) {
        let mut runtime = self.runtime.lock().await;
        if runtime.is_some() {
            debug!(worker_id = %self.id, "Worker pool already running");
            return;
        }

        let (shutdown, token) = shutdown_channel();
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();

        let mut inboxes = Vec::with_capacity(self.concurrency);
        let mut contexts = Vec::with_capacity(self.concurrency);
        for context_id in 0..self.concurrency {
            let (inbox, handle) = ExecutionContext::spawn(
                context_id,
                Arc::clone(&self.executor),
                self.options.execution_timeout(),
                completion_tx.clone(),
            );
            inboxes.push(Some(inbox));
            contexts.push(handle);
        }
        // The handler must see the channel close once the last context exits
        drop(completion_tx);

        let completions = tokio::spawn(
            CompletionHandler {
                worker_id: self.id.clone(),
                queue: Arc::clone(&self.queue),
                in_flight: Arc::clone(&self.in_flight),
                completions: completion_rx,
            }
            .run(),
        );

        let dispatcher = tokio::spawn(
            Dispatcher {
                worker_id: self.id.clone(),
                queue: Arc::clone(&self.queue),
                options: self.options.clone(),
                in_flight: Arc::clone(&self.in_flight),
                inboxes,
            }
            .run(token),
        );

        self.running.store(true, Ordering::SeqCst);
        *runtime = Some(PoolRuntime {
            shutdown,
            dispatcher,
            contexts,
            completions,
        });

        info!(
            worker_id = %self.id,
            queue = %self.queue.name(),
            concurrency = self.concurrency,
            "Worker pool started"
        );
    }

    /// Stop dispatching, wait for in-flight tasks to reach a recorded
    /// outcome, then release the contexts. No-op when not running.
    pub async fn stop(&self) {
        let Some(runtime) = self.runtime.lock().await.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        info!(worker_id = %self.id, "Stopping worker pool");

        runtime.shutdown.shutdown();
        if let Err(e) = runtime.dispatcher.await {
            error!(worker_id = %self.id, error = %e, "Dispatcher ended abnormally");
        }

        loop {
            let in_flight = self.in_flight_count().await;
            if in_flight == 0 {
                break;
            }
            debug!(worker_id = %self.id, in_flight, "Waiting for in-flight tasks");
            sleep(self.options.drain_poll_interval()).await;
        }

        for handle in runtime.contexts {
            if let Err(e) = handle.await {
                error!(worker_id = %self.id, error = %e, "Execution context ended abnormally");
            }
        }
        if let Err(e) = runtime.completions.await {
            error!(worker_id = %self.id, error = %e, "Completion handler ended abnormally");
        }

        info!(worker_id = %self.id, "Worker pool stopped");
    }
}
