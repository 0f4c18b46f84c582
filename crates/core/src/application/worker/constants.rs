// Worker pool defaults (no magic values in the dispatch loop)

/// Dispatcher sleep when the queue has nothing pending (1s)
pub const DEFAULT_IDLE_POLL_MS: u64 = 1000;

/// Dispatcher sleep when every execution context is busy (100ms)
pub const DEFAULT_BUSY_POLL_MS: u64 = 100;

/// Poll interval while `stop` waits for in-flight tasks (100ms)
pub const DEFAULT_DRAIN_POLL_MS: u64 = 100;

/// Dispatcher sleep after a failed tick (1s)
pub const DEFAULT_ERROR_BACKOFF_MS: u64 = 1000;

/// An execution context holds at most one task at a time
pub const CONTEXT_INBOX_CAPACITY: usize = 1;
