//! # stmtpool
//!
//! Pool of prepared statements on top of the `expirable` LRU/TTL cache.
//!
//! ## Pinning
//! - **mount**: pins a statement and hands out its shared handle
//! - **unmount**: unpins it, making it eligible for eviction again
//! - **eviction veto**: pinned or non-evictable statements are re-admitted
//!   instead of closed, whether capacity or TTL triggered the eviction
//!
//! The pool does not build queries or manage connections; callers supply a
//! [`Prepare`] implementation and the pool caches what it returns.

#![warn(missing_docs)]

mod entry;
mod error;
mod pool;
mod statement;

pub use entry::PoolEntry;
pub use error::{PoolError, Result};
pub use expirable::{CacheConfig, CacheStats, StatsSnapshot};
pub use pool::StatementPool;
pub use statement::{Prepare, Statement};
