// Task Executor Port
// Boundary to the external record store that performs a task's operation

use crate::domain::Task;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Execution failures, classified by the executor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Connectivity or other transient condition; worth another attempt
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Validation, not-found, constraint violation; retrying cannot help
    #[error("Permanent failure: {0}")]
    Permanent(String),

    #[error("Execution timeout after {0}ms")]
    Timeout(u64),

    #[error("Executor panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Transient(_) | ExecutionError::Timeout(_))
    }
}

/// Task Executor trait
///
/// Implementations:
/// - InMemoryRecordStore (deferq-infra-records): reference record store
/// - MockTaskExecutor: scripted behaviour for tests
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Perform `task.operation` on `task.entity_kind` with `task.payload`
    ///
    /// The task is a snapshot; mutating the queue's copy is not possible from here.
    ///
    /// # Errors
    /// - ExecutionError::Transient if the record store is temporarily unreachable
    /// - ExecutionError::Permanent if the request can never succeed
    async fn execute(&self, task: &Task) -> Result<Value, ExecutionError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::sync::Semaphore;

    /// Mock executor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed with this result
        Succeed(Value),
        /// Always fail with a retryable error
        FailTransient(String),
        /// Always fail with a non-retryable error
        FailPermanent(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
    }

    /// Mock Task Executor for testing
    ///
    /// With a gate attached, every call waits for one permit before running,
    /// which lets tests hold executions in flight.
    pub struct MockTaskExecutor {
        behavior: Arc<Mutex<MockBehavior>>,
        call_count: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockTaskExecutor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Arc::new(Mutex::new(behavior)),
                call_count: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                max_running: AtomicUsize::new(0),
                gate: None,
            }
        }
        pub fn new_success() -> Self {
            Self::new(MockBehavior::Succeed(json!({"ok": true})))
        }
        pub fn new_transient(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::FailTransient(message.into()))
        }
        pub fn new_permanent(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::FailPermanent(message.into()))
        }
        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }
        pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
            self.gate = Some(gate);
            self
        }
        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
        /// Highest number of executions observed running at once
        pub fn max_running(&self) -> usize {
            self.max_running.load(Ordering::SeqCst)
        }
        pub fn running(&self) -> usize {
            self.running.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskExecutor for MockTaskExecutor {
        async fn execute(&self, _task: &Task) -> Result<Value, ExecutionError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now_running, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }

            let behavior = self.behavior.lock().unwrap().clone();
            self.running.fetch_sub(1, Ordering::SeqCst);

            match behavior {
                MockBehavior::Succeed(result) => Ok(result),
                MockBehavior::FailTransient(msg) => Err(ExecutionError::Transient(msg)),
                MockBehavior::FailPermanent(msg) => Err(ExecutionError::Permanent(msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ExecutionError::Transient("connection reset".into()).is_retryable());
        assert!(ExecutionError::Timeout(500).is_retryable());
        assert!(!ExecutionError::Permanent("not found".into()).is_retryable());
        assert!(!ExecutionError::Panicked("boom".into()).is_retryable());
    }
}
