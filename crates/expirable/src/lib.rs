//! # expirable
//!
//! Thread-safe cache combining LRU capacity eviction with TTL expiry.
//!
//! ## Architecture
//! - **HashMap**: AHash key map into a slab of entries (O(1))
//! - **Recency list**: slab-backed circular list with a sentinel (O(1) promote/evict)
//! - **Expiry buckets**: 100-slot ring swept by one background thread, no per-entry timers
//! - **Eviction hook**: callback run under the cache lock, able to veto by re-admitting
//!
//! ## Example
//!
//! ```
//! use expirable::Cache;
//! use std::time::Duration;
//!
//! let cache = Cache::new(2, Duration::from_secs(60));
//! cache.add("a", 1);
//! cache.add("b", 2);
//! cache.add("c", 3); // "a" is least recently used
//!
//! assert_eq!(cache.get("a"), None);
//! assert_eq!(cache.get("c"), Some(3));
//! ```

#![warn(missing_docs)]

mod buckets;
mod cache;
mod config;
mod list;
mod stats;
mod sweeper;

pub use cache::{Cache, EvictCallback, Extender, ResizeOutcome};
pub use config::CacheConfig;
pub use stats::{CacheStats, StatsSnapshot};
