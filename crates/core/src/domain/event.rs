// Lifecycle events emitted for external listeners

use crate::domain::task::TaskId;
use serde::Serialize;
use serde_json::Value;

/// Closed set of lifecycle events. Every event carries the queue it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind")]
pub enum QueueEvent {
    #[serde(rename = "task:enqueued")]
    TaskEnqueued { queue: String, task_id: TaskId },

    #[serde(rename = "task:dequeued")]
    TaskDequeued { queue: String, task_id: TaskId },

    #[serde(rename = "task:completed")]
    TaskCompleted {
        queue: String,
        task_id: TaskId,
        result: Value,
    },

    /// Retryable failure; `retry` tells whether the task went back to pending
    #[serde(rename = "task:failed")]
    TaskFailed {
        queue: String,
        task_id: TaskId,
        error: String,
        retry: bool,
    },

    #[serde(rename = "task:error")]
    TaskError {
        queue: String,
        task_id: TaskId,
        error: String,
    },

    #[serde(rename = "worker:error")]
    WorkerError {
        queue: String,
        worker_id: String,
        error: String,
    },
}

impl QueueEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            QueueEvent::TaskEnqueued { .. } => "task:enqueued",
            QueueEvent::TaskDequeued { .. } => "task:dequeued",
            QueueEvent::TaskCompleted { .. } => "task:completed",
            QueueEvent::TaskFailed { .. } => "task:failed",
            QueueEvent::TaskError { .. } => "task:error",
            QueueEvent::WorkerError { .. } => "worker:error",
        }
    }

    pub fn queue(&self) -> &str {
        match self {
            QueueEvent::TaskEnqueued { queue, .. }
            | QueueEvent::TaskDequeued { queue, .. }
            | QueueEvent::TaskCompleted { queue, .. }
            | QueueEvent::TaskFailed { queue, .. }
            | QueueEvent::TaskError { queue, .. }
            | QueueEvent::WorkerError { queue, .. } => queue,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            QueueEvent::TaskEnqueued { task_id, .. }
            | QueueEvent::TaskDequeued { task_id, .. }
            | QueueEvent::TaskCompleted { task_id, .. }
            | QueueEvent::TaskFailed { task_id, .. }
            | QueueEvent::TaskError { task_id, .. } => Some(task_id),
            QueueEvent::WorkerError { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialized_kind_matches_kind() {
        let event = QueueEvent::TaskFailed {
            queue: "q1".into(),
            task_id: "t-1".into(),
            error: "timeout".into(),
            retry: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], event.kind());
        assert_eq!(value["retry"], true);
        assert_eq!(event.queue(), "q1");
        assert_eq!(event.task_id(), Some("t-1"));
    }
}
