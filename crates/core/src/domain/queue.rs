// Queue Domain Model

use crate::domain::retention::RetentionPolicy;
use crate::domain::task::{Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Queue identifier
pub type QueueName = String;

/// Default attempt budget for retryable failures
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Resolved queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    pub name: QueueName,
    pub max_retries: u32,
    pub retention: RetentionPolicy,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_retries: DEFAULT_MAX_RETRIES,
            retention: RetentionPolicy::default(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }
}

/// Per-queue overrides supplied at creation time (unset fields fall back to
/// the registry defaults)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    pub max_retries: Option<u32>,
    pub retention: Option<RetentionPolicy>,
}

/// Per-status task counts, always derived from the history
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub name: QueueName,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub error: usize,
}

impl QueueStats {
    pub fn from_tasks<'a>(name: impl Into<String>, tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut stats = QueueStats {
            name: name.into(),
            ..Default::default()
        };
        for task in tasks {
            stats.total += 1;
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Error => stats.error += 1,
            }
        }
        stats
    }
}

/// Full durable state of one queue.
///
/// Every persist writes a whole snapshot; there is no delta log to replay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: QueueName,
    /// Resolved settings; absent in files written before they were stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionPolicy>,
    /// Dispatch order, head first
    pub pending: Vec<Task>,
    pub history: BTreeMap<TaskId, Task>,
}

/// Task listing filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TaskFilter {
    /// Upper bound on a single listing page
    pub const MAX_LIMIT: usize = 50;

    pub fn with_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::MAX_LIMIT)
            .min(Self::MAX_LIMIT)
    }

    pub fn matches(&self, task: &Task) -> bool {
        self.status.map_or(true, |status| task.status == status)
    }
}
