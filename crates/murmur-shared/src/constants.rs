use std::time::Duration;

/// Ledger account address size in bytes
pub const ADDRESS_SIZE: usize = 20;

/// Maximum post body size in bytes (UTF-8)
pub const MAX_POST_BYTES: usize = 4096;

/// Maximum username length in characters
pub const MAX_USERNAME_LEN: usize = 32;

/// Maximum display name length in characters
pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Depth cap for thread traversal (ancestor chains and reply subtrees)
pub const MAX_THREAD_DEPTH: usize = 64;

/// Default number of ledger calls kept in flight during a fan-out
pub const DEFAULT_FANOUT: usize = 8;

/// Default time-to-live for mutable ledger reads (counters, edge lists)
pub const DEFAULT_READ_TTL: Duration = Duration::from_secs(15);

/// Default timeout applied to each individual network call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default lifetime of an optimistic overlay entry before it is
/// garbage-collected even without ledger confirmation
pub const DEFAULT_OVERLAY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default capacity of the content resolution cache (entries)
pub const DEFAULT_CONTENT_CACHE_CAPACITY: usize = 1024;
