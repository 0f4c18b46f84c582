//! Daemon settings: built-in defaults, optional TOML file, `DEFERQ_*` environment

use config::{Config, ConfigError, Environment, File};
use deferq_core::domain::{QueueOptions, RetentionPolicy, DEFAULT_MAX_RETRIES};
use deferq_core::{RegistryConfig, WorkerOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_PERSIST_DIR: &str = "~/.deferq/queues";
const ENV_PREFIX: &str = "DEFERQ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// A queue created at startup, with its worker pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueBootstrap {
    pub name: String,
    #[serde(default = "default_one")]
    pub workers: usize,
    #[serde(default = "default_one")]
    pub concurrency: usize,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

fn default_one() -> usize {
    1
}

impl QueueBootstrap {
    pub fn options(&self) -> QueueOptions {
        QueueOptions {
            max_retries: self.max_retries,
            retention: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Persistence root; `~` is expanded
    pub persist_dir: String,
    pub max_retries: u32,
    pub log_format: LogFormat,
    /// Daily-rolling log files go here when set
    pub log_dir: Option<String>,
    pub recover_orphaned_on_start: bool,
    pub retention: RetentionPolicy,
    pub worker: WorkerOptions,
    /// Entity tables served by the built-in record store
    pub entities: Vec<String>,
    pub queues: Vec<QueueBootstrap>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            persist_dir: DEFAULT_PERSIST_DIR.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            log_format: LogFormat::Pretty,
            log_dir: None,
            recover_orphaned_on_start: true,
            retention: RetentionPolicy::unbounded(),
            worker: WorkerOptions::default(),
            entities: ["Classroom", "Enrollment", "Level", "Schedule", "Teacher"]
                .into_iter()
                .map(String::from)
                .collect(),
            queues: vec![QueueBootstrap {
                name: "default".to_string(),
                workers: 1,
                concurrency: 2,
                max_retries: None,
            }],
        }
    }
}

impl Settings {
    /// Load settings from the process environment and an optional file
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, None)
    }

    /// Same as [`Settings::load`] with an explicit environment map
    /// (`None` reads the process environment)
    pub fn load_from(
        path: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.persist_dir.trim().is_empty() {
            return Err(ConfigError::Message("persist_dir must not be empty".into()));
        }
        if self.retention.max_terminal_age_ms.is_some_and(|age| age < 0) {
            return Err(ConfigError::Message(
                "retention.max_terminal_age_ms must not be negative".into(),
            ));
        }
        for queue in &self.queues {
            if queue.concurrency == 0 {
                return Err(ConfigError::Message(format!(
                    "queue {}: concurrency must be at least 1",
                    queue.name
                )));
            }
        }
        Ok(())
    }

    pub fn persist_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.persist_dir).into_owned())
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.log_dir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            max_retries: self.max_retries,
            retention: self.retention.clone(),
            ..Default::default()
        }
    }
}
