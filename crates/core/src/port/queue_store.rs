// Queue Store Port (Interface)

use crate::domain::QueueSnapshot;
use crate::error::Result;
use async_trait::async_trait;

/// Durable storage for queue snapshots, one persisted unit per queue name
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Make sure the persistence root exists
    async fn prepare(&self) -> Result<()>;

    /// Names of every queue with persisted state
    async fn list_queues(&self) -> Result<Vec<String>>;

    /// Load a queue's last persisted snapshot.
    ///
    /// A queue that was never persisted yields `Ok(None)`, not an error.
    async fn load(&self, queue: &str) -> Result<Option<QueueSnapshot>>;

    /// Replace the queue's persisted state with `snapshot`
    async fn save(&self, snapshot: &QueueSnapshot) -> Result<()>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory store that keeps snapshots as serialized JSON
    /// (so reloads go through the same serde path as the file store)
    #[derive(Default)]
    pub struct InMemoryQueueStore {
        files: Mutex<HashMap<String, String>>,
        save_count: AtomicUsize,
        fail_saves: AtomicBool,
    }

    impl InMemoryQueueStore {
        pub fn new() -> Self {
            Self::default()
        }
        /// Seed raw persisted content for a queue
        pub fn insert_raw(&self, queue: impl Into<String>, content: impl Into<String>) {
            self.files.lock().unwrap().insert(queue.into(), content.into());
        }
        pub fn raw(&self, queue: &str) -> Option<String> {
            self.files.lock().unwrap().get(queue).cloned()
        }
        pub fn save_count(&self) -> usize {
            self.save_count.load(Ordering::SeqCst)
        }
        /// Make every subsequent save fail (simulates a full disk)
        pub fn set_fail_saves(&self, fail: bool) {
            self.fail_saves.store(fail, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl QueueStore for InMemoryQueueStore {
        async fn prepare(&self) -> Result<()> {
            Ok(())
        }
        async fn list_queues(&self) -> Result<Vec<String>> {
            let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
            names.sort();
            Ok(names)
        }
        async fn load(&self, queue: &str) -> Result<Option<QueueSnapshot>> {
            match self.raw(queue) {
                Some(content) => Ok(Some(serde_json::from_str(&content)?)),
                None => Ok(None),
            }
        }
        async fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(AppError::Persistence(format!(
                    "simulated write failure for {}",
                    snapshot.name
                )));
            }
            let content = serde_json::to_string_pretty(snapshot)?;
            self.files
                .lock()
                .unwrap()
                .insert(snapshot.name.clone(), content);
            self.save_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
