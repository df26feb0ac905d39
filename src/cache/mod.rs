//! Named response stores for offline support.
//!
//! Each store maps a request URL to the last response written for it.
//! Stores are created on first open and removed only by an explicit delete;
//! entries never expire.

mod memory;
mod storage;
mod traits;

pub use memory::MemoryStorage;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CachedResponse, ResponseSource, Served};
