//! Cache configuration options

use std::time::Duration;

use crate::buckets::NUM_BUCKETS;

/// Guards against a zero tick for TTLs shorter than one nanosecond per slot
const MIN_SWEEP_INTERVAL: Duration = Duration::from_nanos(1);

/// Configuration for a [`Cache`](crate::Cache)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheConfig {
    /// Maximum number of entries; 0 means unbounded
    pub capacity: usize,
    /// Entry lifetime; zero means entries never expire
    pub ttl: Duration,
}

impl CacheConfig {
    /// Create a configuration with the given capacity and TTL
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self { capacity, ttl }
    }

    /// Set the maximum number of entries
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the TTL duration
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// TTL normalized so that zero means no expiry
    pub fn expiry(&self) -> Option<Duration> {
        if self.ttl.is_zero() {
            None
        } else {
            Some(self.ttl)
        }
    }

    /// Period of the background sweeper, if one is needed
    pub fn sweep_interval(&self) -> Option<Duration> {
        self.expiry()
            .map(|ttl| (ttl / NUM_BUCKETS as u32).max(MIN_SWEEP_INTERVAL))
    }
}
