//! deferq - Main Entry Point
//! Durable named task queues with worker pools over a record store

mod logging;
mod settings;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// Import workspace crates
use deferq_core::{QueueEvent, QueueRegistry};
use deferq_infra_fs::JsonFileQueueStore;
use deferq_infra_records::InMemoryRecordStore;
use settings::Settings;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "deferq")]
#[command(about = "Durable task queue daemon", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "DEFERQ_CONFIG")]
    config: Option<PathBuf>,

    /// Persistence root (overrides configuration)
    #[arg(long)]
    persist_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = cli.persist_dir {
        settings.persist_dir = dir;
    }

    // 2. Initialize logging (guard keeps the file writer alive)
    let log_dir = settings.log_dir();
    let _log_guard = logging::init(settings.log_format, log_dir.as_deref())?;
    info!("deferq v{} starting...", VERSION);

    // 3. Setup dependencies (DI wiring)
    let persist_dir = settings.persist_dir();
    info!(persist_dir = %persist_dir.display(), "Opening persistence root");
    let store = Arc::new(JsonFileQueueStore::new(&persist_dir));
    let executor = Arc::new(InMemoryRecordStore::new(settings.entities.clone()));
    let registry = Arc::new(QueueRegistry::new(store, executor, settings.registry_config()));

    let events = spawn_event_logger(registry.subscribe());

    // 4. Load persisted queues
    registry
        .initialize()
        .await
        .context("Failed to load persisted queues")?;

    // 5. Crash recovery: tasks left in processing by a previous run
    if settings.recover_orphaned_on_start {
        match registry.recover_orphaned().await {
            Ok(count) => info!(recovered_tasks = count, "Crash recovery completed"),
            Err(e) => error!(error = %e, "Crash recovery failed"),
        }
    }

    // 6. Bootstrap configured queues and their workers
    for queue in &settings.queues {
        registry
            .create_queue(&queue.name, queue.options())
            .await
            .with_context(|| format!("Failed to create queue {}", queue.name))?;
        for _ in 0..queue.workers {
            registry
                .create_worker(&queue.name, queue.concurrency, settings.worker.clone())
                .await
                .with_context(|| format!("Failed to start worker on {}", queue.name))?;
        }
    }

    for (name, stats) in registry.all_stats().await {
        info!(
            queue = %name,
            pending = stats.pending,
            processing = stats.processing,
            completed = stats.completed,
            failed = stats.failed,
            error = stats.error,
            "Queue ready"
        );
    }

    info!("System ready. Waiting for tasks...");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Draining workers...");

    // 8. Graceful shutdown: drain pools, flush queues
    registry.shutdown().await;
    events.abort();

    info!("Shutdown complete.");
    Ok(())
}

/// Log every lifecycle event until the bus closes
fn spawn_event_logger(mut events: broadcast::Receiver<QueueEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn log_event(event: &QueueEvent) {
    match event {
        QueueEvent::TaskEnqueued { queue, task_id } | QueueEvent::TaskDequeued { queue, task_id } => {
            debug!(kind = event.kind(), queue = %queue, task_id = %task_id, "Queue event");
        }
        QueueEvent::TaskCompleted { queue, task_id, .. } => {
            info!(kind = event.kind(), queue = %queue, task_id = %task_id, "Queue event");
        }
        QueueEvent::TaskFailed {
            queue,
            task_id,
            error,
            retry,
        } => {
            warn!(kind = event.kind(), queue = %queue, task_id = %task_id, error = %error, retry, "Queue event");
        }
        QueueEvent::TaskError {
            queue,
            task_id,
            error,
        } => {
            warn!(kind = event.kind(), queue = %queue, task_id = %task_id, error = %error, "Queue event");
        }
        QueueEvent::WorkerError {
            queue,
            worker_id,
            error,
        } => {
            error!(kind = event.kind(), queue = %queue, worker_id = %worker_id, error = %error, "Queue event");
        }
    }
}
