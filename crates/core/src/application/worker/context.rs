// Execution context - one isolated executor slot of a worker pool

use super::constants::CONTEXT_INBOX_CAPACITY;
use super::panic_guard::execute_isolated;
use crate::domain::Task;
use crate::port::{ExecutionError, TaskExecutor};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub(crate) type ContextId = usize;

/// What a context reports back after running one task
#[derive(Debug)]
pub(crate) struct Completion {
    pub context: ContextId,
    pub task: Task,
    pub outcome: Result<Value, ExecutionError>,
    pub duration_ms: u128,
}

/// Receives task snapshots one at a time and runs them through the executor.
///
/// The context never touches the queue; every outcome goes back to the pool's
/// completion handler.
pub(crate) struct ExecutionContext {
    id: ContextId,
    executor: Arc<dyn TaskExecutor>,
    timeout: Option<Duration>,
    inbox: mpsc::Receiver<Task>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl ExecutionContext {
    /// Spawn a context; dropping the returned sender lets it finish and exit
    pub(crate) fn spawn(
        id: ContextId,
        executor: Arc<dyn TaskExecutor>,
        timeout: Option<Duration>,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> (mpsc::Sender<Task>, JoinHandle<()>) {
        let (tx, inbox) = mpsc::channel(CONTEXT_INBOX_CAPACITY);
        let context = Self {
            id,
            executor,
            timeout,
            inbox,
            completions,
        };
        (tx, tokio::spawn(context.run()))
    }

    async fn run(mut self) {
        while let Some(task) = self.inbox.recv().await {
            debug!(context = self.id, task_id = %task.id, "Executing task");
            let started = Instant::now();
            let outcome =
                execute_isolated(Arc::clone(&self.executor), task.clone(), self.timeout).await;

            let completion = Completion {
                context: self.id,
                task,
                outcome,
                duration_ms: started.elapsed().as_millis(),
            };
            if let Err(lost) = self.completions.send(completion) {
                warn!(
                    context = self.id,
                    task_id = %lost.0.task.id,
                    "Completion handler gone; dropping outcome"
                );
                break;
            }
        }
        debug!(context = self.id, "Execution context exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Operation;
    use crate::port::task_executor::mocks::MockTaskExecutor;
    use serde_json::{json, Map};

    #[tokio::test]
    async fn test_context_reports_each_task_and_exits() {
        let (completions_tx, mut completions) = mpsc::unbounded_channel();
        let executor = Arc::new(MockTaskExecutor::new_success());
        let (inbox, handle) = ExecutionContext::spawn(7, executor, None, completions_tx);

        for id in ["t-1", "t-2"] {
            let task = Task::new(id, 0, "q1", "Widget", Operation::Create, json!({"a": 1}), Map::new());
            inbox.send(task).await.unwrap();
            let completion = completions.recv().await.unwrap();
            assert_eq!(completion.context, 7);
            assert_eq!(completion.task.id, id);
            assert!(completion.outcome.is_ok());
        }

        drop(inbox);
        handle.await.unwrap();
        assert!(completions.recv().await.is_none());
    }
}
