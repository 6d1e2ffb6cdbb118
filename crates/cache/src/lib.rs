#![warn(clippy::unwrap_used)]

pub mod durable;
pub mod entry;
pub mod freshness;
pub mod glob;
pub mod local;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use durable::DurableStore;
pub use entry::{CacheEntry, EntryKind, EntryMeta};
pub use freshness::{Freshness, FreshnessPolicy};
pub use local::LocalCache;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{CacheStore, LockOutcome, LockToken, PurgeOutcome};
