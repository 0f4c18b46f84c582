// Application Layer - Queue services, worker pools and the registry

pub mod enqueue;
pub mod events;
pub mod queue;
pub mod registry;
pub mod worker;

// Re-exports
pub use enqueue::EnqueueRequest;
pub use events::EventBus;
pub use queue::{Queue, QueueContext};
pub use registry::{QueueRegistry, RegistryConfig};
pub use worker::{WorkerId, WorkerInfo, WorkerOptions, WorkerPool};
