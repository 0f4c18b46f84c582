// History retention policy
//
// The default keeps every task forever. Only terminal tasks are ever evicted,
// so pending and in-flight work is never touched.

use crate::domain::task::{Task, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Keep at most this many terminal tasks (oldest evicted first)
    pub max_terminal_tasks: Option<usize>,
    /// Evict terminal tasks completed longer ago than this
    pub max_terminal_age_ms: Option<i64>,
}

impl RetentionPolicy {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_terminal_tasks.is_none() && self.max_terminal_age_ms.is_none()
    }

    /// Remove terminal tasks that fall outside the policy, returning their IDs
    pub fn prune(&self, history: &mut HashMap<TaskId, Task>, now_millis: i64) -> Vec<TaskId> {
        if self.is_unbounded() {
            return Vec::new();
        }

        let mut terminal: Vec<(i64, TaskId)> = history
            .values()
            .filter(|task| task.is_terminal())
            .map(|task| (task.completed_at.unwrap_or(task.created_at), task.id.clone()))
            .collect();
        terminal.sort();

        let mut evicted = Vec::new();

        if let Some(max_age) = self.max_terminal_age_ms {
            let cutoff = now_millis.saturating_sub(max_age.max(0));
            let expired = terminal.iter().take_while(|(at, _)| *at < cutoff).count();
            evicted.extend(terminal.drain(..expired).map(|(_, id)| id));
        }

        if let Some(max_tasks) = self.max_terminal_tasks {
            let excess = terminal.len().saturating_sub(max_tasks);
            evicted.extend(terminal.drain(..excess).map(|(_, id)| id));
        }

        for id in &evicted {
            history.remove(id);
        }
        evicted
    }
}
