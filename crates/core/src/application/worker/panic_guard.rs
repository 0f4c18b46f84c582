// Panic isolation for executions (an executor panic must not take the pool down)

use crate::domain::Task;
use crate::port::{ExecutionError, TaskExecutor};
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Run one execution on its own tokio task, optionally bounded by `timeout`.
///
/// A panic inside the executor surfaces as `ExecutionError::Panicked`, an
/// expired timeout as `ExecutionError::Timeout`.
pub(crate) async fn execute_isolated(
    executor: Arc<dyn TaskExecutor>,
    task: Task,
    timeout: Option<Duration>,
) -> Result<Value, ExecutionError> {
    let task_id = task.id.clone();
    let handle = tokio::spawn(async move {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, executor.execute(&task))
                .await
                .unwrap_or_else(|_| Err(ExecutionError::Timeout(limit.as_millis() as u64))),
            None => executor.execute(&task).await,
        }
    });

    match handle.await {
        Ok(outcome) => outcome,
        Err(join_err) if join_err.is_panic() => {
            let panic_msg = panic_message(join_err.into_panic());
            error!(task_id = %task_id, panic_msg = %panic_msg, "Executor panicked");
            Err(ExecutionError::Panicked(panic_msg))
        }
        // Only happens while the runtime itself is going away
        Err(join_err) => Err(ExecutionError::Transient(format!(
            "execution cancelled: {}",
            join_err
        ))),
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
