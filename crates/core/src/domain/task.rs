// Task Domain Model

use crate::domain::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

/// Task ID (UUID v4)
pub type TaskId = String;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Error,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Error,
    ];

    /// `completed`, `failed` and `error` accept no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

/// Record-store operation a task asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    BulkCreate,
    BulkUpdate,
    BulkDelete,
}

impl Operation {
    pub const ALL: [Operation; 6] = [
        Operation::Create,
        Operation::Update,
        Operation::Delete,
        Operation::BulkCreate,
        Operation::BulkUpdate,
        Operation::BulkDelete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::BulkCreate => "bulkCreate",
            Operation::BulkUpdate => "bulkUpdate",
            Operation::BulkDelete => "bulkDelete",
        }
    }

    pub fn is_bulk(self) -> bool {
        matches!(
            self,
            Operation::BulkCreate | Operation::BulkUpdate | Operation::BulkDelete
        )
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive: `bulkcreate` and `bulkCreate` name the same operation
impl FromStr for Operation {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        Operation::ALL
            .into_iter()
            .find(|op| op.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DomainError::UnsupportedOperation(s.to_string()))
    }
}

/// Task Entity
///
/// Only `status`, `started_at`, `completed_at`, `result`, `error` and
/// `retry_count` change after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub queue_name: String,
    pub entity_kind: String,
    pub operation: Operation,
    pub payload: Value,
    #[serde(default)]
    pub options: Map<String, Value>,

    pub status: TaskStatus,

    pub created_at: i64, // epoch ms
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,

    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
}

impl Task {
    /// Create a new pending task
    ///
    /// # Arguments
    ///
    /// * `id` - Unique task ID (injected, not generated)
    /// * `created_at` - Creation timestamp in epoch ms (injected, not system time)
    /// * `queue_name` - Owning queue
    /// * `entity_kind` - Target model in the record store
    /// * `operation` - Operation to perform
    /// * `payload` - Operation payload
    /// * `options` - Opaque options passed through to the executor
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        queue_name: impl Into<String>,
        entity_kind: impl Into<String>,
        operation: Operation,
        payload: Value,
        options: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            queue_name: queue_name.into(),
            entity_kind: entity_kind.into(),
            operation,
            payload,
            options,
            status: TaskStatus::Pending,
            created_at,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            retry_count: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Transition to Processing with explicit timestamp
    pub fn start(&mut self, now_millis: i64) -> Result<()> {
        self.expect_status(TaskStatus::Pending, TaskStatus::Processing)?;
        self.status = TaskStatus::Processing;
        self.started_at = Some(now_millis);
        Ok(())
    }

    /// Move a Processing task into a terminal status.
    ///
    /// Supplying an error counts as one more failed attempt.
    pub fn finish(
        &mut self,
        status: TaskStatus,
        now_millis: i64,
        result: Option<Value>,
        error: Option<String>,
    ) -> Result<()> {
        if !status.is_terminal() {
            return Err(self.transition_error(status));
        }
        self.expect_status(TaskStatus::Processing, status)?;

        self.status = status;
        self.completed_at = Some(now_millis);
        if let Some(result) = result {
            self.result = Some(result);
        }
        if let Some(error) = error {
            self.error = Some(error);
            self.retry_count += 1;
        }
        Ok(())
    }

    /// Record a retryable failure.
    ///
    /// Returns `true` when the task went back to Pending, `false` when the
    /// attempt budget is spent and the task is now Failed.
    pub fn retry(&mut self, now_millis: i64, error: Option<String>, max_retries: u32) -> Result<bool> {
        self.expect_status(TaskStatus::Processing, TaskStatus::Pending)?;

        if let Some(error) = error {
            self.error = Some(error);
        }
        self.retry_count += 1;

        if self.retry_count >= max_retries {
            self.status = TaskStatus::Failed;
            self.completed_at = Some(now_millis);
            return Ok(false);
        }

        self.status = TaskStatus::Pending;
        self.started_at = None;
        Ok(true)
    }

    /// Put a Processing task back to Pending without counting an attempt
    /// (dispatch could not hand it over, or its execution context died).
    pub fn release(&mut self) -> Result<()> {
        self.expect_status(TaskStatus::Processing, TaskStatus::Pending)?;
        self.status = TaskStatus::Pending;
        self.started_at = None;
        Ok(())
    }

    fn expect_status(&self, expected: TaskStatus, to: TaskStatus) -> Result<()> {
        if self.status != expected {
            return Err(self.transition_error(to));
        }
        Ok(())
    }

    fn transition_error(&self, to: TaskStatus) -> DomainError {
        DomainError::InvalidStateTransition {
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}
