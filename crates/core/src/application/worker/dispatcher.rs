// Dispatch loop and completion handling of a worker pool

use super::context::{Completion, ContextId};
use super::options::WorkerOptions;
use super::shutdown::ShutdownToken;
use crate::application::queue::Queue;
use crate::domain::{QueueEvent, Task, TaskStatus};
use crate::error::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Contexts currently holding a task. A context is added before its task is
/// handed over and removed only after the outcome reached the queue.
pub(crate) type InFlight = Arc<Mutex<HashSet<ContextId>>>;

#[derive(Debug, PartialEq, Eq)]
enum Tick {
    Dispatched,
    Empty,
    Saturated,
}

/// Moves tasks from the queue into idle execution contexts
pub(crate) struct Dispatcher {
    pub worker_id: String,
    pub queue: Arc<Queue>,
    pub options: WorkerOptions,
    pub in_flight: InFlight,
    /// One inbox per context; `None` once a context is found dead
    pub inboxes: Vec<Option<mpsc::Sender<Task>>>,
}

impl Dispatcher {
    /// Loop until shutdown. Dropping `self` at the end closes every inbox,
    /// which lets the contexts finish what they hold and exit.
    pub(crate) async fn run(mut self, mut shutdown: ShutdownToken) {
        info!(
            worker_id = %self.worker_id,
            queue = %self.queue.name(),
            concurrency = self.inboxes.len(),
            "Dispatcher started"
        );

        loop {
            if shutdown.is_shutdown() {
                break;
            }

            let pause = match self.tick().await {
                Ok(Tick::Dispatched) => continue,
                Ok(Tick::Empty) => self.options.idle_poll_interval(),
                Ok(Tick::Saturated) => self.options.busy_poll_interval(),
                Err(e) => {
                    error!(worker_id = %self.worker_id, error = %e, "Dispatch failed");
                    self.queue.events().publish(QueueEvent::WorkerError {
                        queue: self.queue.name().to_string(),
                        worker_id: self.worker_id.clone(),
                        error: e.to_string(),
                    });
                    self.options.error_backoff()
                }
            };

            tokio::select! {
                _ = sleep(pause) => {},
                _ = shutdown.wait() => break,
            }
        }

        info!(worker_id = %self.worker_id, "Dispatcher stopped");
    }

    async fn tick(&mut self) -> Result<Tick> {
        let mut in_flight = self.in_flight.lock().await;
        let idle = self
            .inboxes
            .iter()
            .enumerate()
            .filter(|(id, _)| !in_flight.contains(id))
            .find_map(|(id, inbox)| inbox.as_ref().map(|tx| (id, tx.clone())));
        let Some((context, inbox)) = idle else {
            return Ok(Tick::Saturated);
        };

        let Some(task) = self.queue.dequeue().await? else {
            return Ok(Tick::Empty);
        };

        in_flight.insert(context);
        match inbox.try_send(task) {
            Ok(()) => {
                debug!(worker_id = %self.worker_id, context, "Task handed to execution context");
                Ok(Tick::Dispatched)
            }
            Err(TrySendError::Full(task)) => {
                in_flight.remove(&context);
                self.queue.return_to_front(&task.id).await?;
                Ok(Tick::Saturated)
            }
            Err(TrySendError::Closed(task)) => {
                in_flight.remove(&context);
                self.inboxes[context] = None;
                let message = format!("execution context {} is no longer running", context);
                error!(worker_id = %self.worker_id, task_id = %task.id, "{}", message);

                self.queue
                    .update_status(&task.id, TaskStatus::Error, None, Some(message.clone()))
                    .await?;
                self.queue.events().publish(QueueEvent::WorkerError {
                    queue: self.queue.name().to_string(),
                    worker_id: self.worker_id.clone(),
                    error: message,
                });
                Ok(Tick::Dispatched)
            }
        }
    }
}

/// Applies execution outcomes to the queue, one at a time
pub(crate) struct CompletionHandler {
    pub worker_id: String,
    pub queue: Arc<Queue>,
    pub in_flight: InFlight,
    pub completions: mpsc::UnboundedReceiver<Completion>,
}

impl CompletionHandler {
    /// Runs until every execution context has exited
    pub(crate) async fn run(mut self) {
        while let Some(completion) = self.completions.recv().await {
            let context = completion.context;
            if let Err(e) = self.record(completion).await {
                error!(worker_id = %self.worker_id, error = %e, "Failed to record task outcome");
                self.queue.events().publish(QueueEvent::WorkerError {
                    queue: self.queue.name().to_string(),
                    worker_id: self.worker_id.clone(),
                    error: e.to_string(),
                });
            }
            // Only now is the context free again
            self.in_flight.lock().await.remove(&context);
        }
        debug!(worker_id = %self.worker_id, "Completion handler exited");
    }

    async fn record(&self, completion: Completion) -> Result<()> {
        let Completion {
            task,
            outcome,
            duration_ms,
            ..
        } = completion;
        let queue = self.queue.name().to_string();

        match outcome {
            Ok(result) => {
                let updated = self
                    .queue
                    .update_status(&task.id, TaskStatus::Completed, Some(result.clone()), None)
                    .await?;
                if !updated {
                    warn!(task_id = %task.id, "Completed task no longer in history");
                }
                info!(
                    worker_id = %self.worker_id,
                    task_id = %task.id,
                    duration_ms = %duration_ms,
                    "Task completed"
                );
                self.queue.events().publish(QueueEvent::TaskCompleted {
                    queue,
                    task_id: task.id,
                    result,
                });
            }
            Err(e) if e.is_retryable() => {
                let error = e.to_string();
                let retry = self.queue.requeue_task(&task.id, Some(error.clone())).await?;
                warn!(
                    worker_id = %self.worker_id,
                    task_id = %task.id,
                    error = %error,
                    retry,
                    "Task failed"
                );
                self.queue.events().publish(QueueEvent::TaskFailed {
                    queue,
                    task_id: task.id,
                    error,
                    retry,
                });
            }
            Err(e) => {
                let error = e.to_string();
                let updated = self
                    .queue
                    .update_status(&task.id, TaskStatus::Error, None, Some(error.clone()))
                    .await?;
                if !updated {
                    warn!(task_id = %task.id, "Errored task no longer in history");
                }
                error!(
                    worker_id = %self.worker_id,
                    task_id = %task.id,
                    error = %error,
                    "Task errored"
                );
                self.queue.events().publish(QueueEvent::TaskError {
                    queue,
                    task_id: task.id,
                    error,
                });
            }
        }
        Ok(())
    }
}
