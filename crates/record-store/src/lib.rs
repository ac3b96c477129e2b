//! Persistence of users and image records.
//!
//! [`RecordStore`] is the only synchronization point of the redemption
//! protocol: its `mark_viewed` is a single conditional update, so exactly
//! one of any number of concurrent callers observes success.

pub mod memory;
pub mod redis_store;
pub mod store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;
pub use store::{predecessors, RecordStore};
