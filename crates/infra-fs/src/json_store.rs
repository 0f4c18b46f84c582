// JSON file QueueStore Implementation

use async_trait::async_trait;
use deferq_core::application::enqueue::validate_queue_name;
use deferq_core::domain::QueueSnapshot;
use deferq_core::error::{AppError, Result};
use deferq_core::port::QueueStore;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

const EXTENSION: &str = "json";
const TMP_SUFFIX: &str = ".tmp";

// Helper to attach the failing path to filesystem errors
fn map_io_error(action: &str, path: &Path, err: std::io::Error) -> AppError {
    AppError::Persistence(format!("Failed to {} {}: {}", action, path.display(), err))
}

/// Stores each queue as `<root>/<queue>.json`.
///
/// Writes go to a sibling temp file that is then renamed over the target, so
/// a crash mid-write leaves the previous snapshot intact.
pub struct JsonFileQueueStore {
    root: PathBuf,
}

impl JsonFileQueueStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a queue's file; the name is validated so it cannot escape the root
    pub fn queue_path(&self, queue: &str) -> Result<PathBuf> {
        validate_queue_name(queue)?;
        Ok(self.root.join(format!("{}.{}", queue, EXTENSION)))
    }
}

#[async_trait]
impl QueueStore for JsonFileQueueStore {
    async fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| map_io_error("create persistence root", &self.root, e))?;
        debug!(root = %self.root.display(), "Persistence root ready");
        Ok(())
    }

    async fn list_queues(&self) -> Result<Vec<String>> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(map_io_error("list", &self.root, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| map_io_error("list", &self.root, e))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                warn!(path = %path.display(), "Skipping queue file with non UTF-8 name");
                continue;
            };
            names.push(stem.to_string());
        }
        names.sort();
        Ok(names)
    }

    async fn load(&self, queue: &str) -> Result<Option<QueueSnapshot>> {
        let path = self.queue_path(queue)?;
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(map_io_error("read", &path, e)),
        };

        let snapshot = serde_json::from_str(&content).map_err(|e| {
            AppError::Persistence(format!("Corrupt queue file {}: {}", path.display(), e))
        })?;
        debug!(queue = %queue, bytes = content.len(), "Queue file loaded");
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &QueueSnapshot) -> Result<()> {
        let path = self.queue_path(&snapshot.name)?;
        let tmp_path = self
            .root
            .join(format!("{}.{}{}", snapshot.name, EXTENSION, TMP_SUFFIX));
        let content = serde_json::to_vec_pretty(snapshot)?;

        fs::write(&tmp_path, &content)
            .await
            .map_err(|e| map_io_error("write", &tmp_path, e))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| map_io_error("replace", &path, e))?;

        debug!(queue = %snapshot.name, bytes = content.len(), "Queue file written");
        Ok(())
    }
}
