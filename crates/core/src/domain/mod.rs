// Domain Layer - Pure queue entities and state machine

pub mod error;
pub mod event;
pub mod queue;
pub mod retention;
pub mod task;

// Re-exports
pub use error::DomainError;
pub use event::QueueEvent;
pub use queue::{
    QueueConfig, QueueName, QueueOptions, QueueSnapshot, QueueStats, TaskFilter,
    DEFAULT_MAX_RETRIES,
};
pub use retention::RetentionPolicy;
pub use task::{Operation, Task, TaskId, TaskStatus};
