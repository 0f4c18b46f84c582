// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod queue_store;
pub mod task_executor;
pub mod time_provider;

// Re-exports
pub use id_provider::IdProvider;
pub use queue_store::QueueStore;
pub use task_executor::{ExecutionError, TaskExecutor};
pub use time_provider::TimeProvider;
