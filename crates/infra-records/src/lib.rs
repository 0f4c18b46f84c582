// deferq Infrastructure - Record Store Adapter
// Implements: TaskExecutor (create/update/delete and bulk variants over in-memory tables)

mod record_store;

pub use record_store::InMemoryRecordStore;
