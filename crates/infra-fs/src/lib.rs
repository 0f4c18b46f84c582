// deferq Infrastructure - File System Adapter
// Implements: QueueStore (one JSON document per queue under the persistence root)

mod json_store;

pub use json_store::JsonFileQueueStore;
