// deferq Core - Queue Domain, Ports & Services
// NO infrastructure dependencies (Hexagonal Architecture)

pub mod application;
pub mod domain;
pub mod error;
pub mod port;

pub use application::{
    EnqueueRequest, EventBus, Queue, QueueContext, QueueRegistry, RegistryConfig, WorkerId,
    WorkerInfo, WorkerOptions, WorkerPool,
};
pub use domain::{
    Operation, QueueEvent, QueueOptions, QueueSnapshot, QueueStats, RetentionPolicy, Task,
    TaskFilter, TaskId, TaskStatus,
};
pub use port::{ExecutionError, QueueStore, TaskExecutor};
pub use error::{AppError, Result};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
