//! Statement pool with pinning
//!
//! Built on one `Cache<String, PoolEntry<S>>`. The cache's eviction callback
//! re-admits pinned or non-evictable entries and closes everything else, so a
//! statement handed out by [`StatementPool::mount`] is never released while
//! it stays pinned.

use std::sync::Arc;
use std::time::Duration;

use expirable::{Cache, CacheConfig, CacheStats, Extender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::entry::PoolEntry;
use crate::error::{PoolError, Result};
use crate::statement::{Prepare, Statement};

/// Pool of prepared statements keyed by name
pub struct StatementPool<S: Statement> {
    cache: Cache<String, PoolEntry<S>>,
    /// Serializes the multi-step operations
    lock: Mutex<()>,
}

impl<S: Statement> StatementPool<S> {
    /// Create a pool
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of statements, 0 for unbounded
    /// * `ttl` - Statement lifetime when unpinned, zero for no expiry
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::from_config(CacheConfig::new(capacity, ttl))
    }

    /// Create a pool from a cache configuration
    pub fn from_config(config: CacheConfig) -> Self {
        Self {
            cache: Cache::from_config(config, Some(Box::new(veto_or_release::<S>))),
            lock: Mutex::new(()),
        }
    }

    /// Return the cached entry for `key`, or prepare and cache `query`
    ///
    /// The first build wins: on a hit the flags and connection passed here
    /// are ignored. On a prepare failure nothing is cached.
    pub fn build<C>(
        &self,
        key: &str,
        query: &str,
        conn: &C,
        evictable: bool,
        pinned: bool,
    ) -> Result<PoolEntry<S>>
    where
        C: Prepare<S>,
    {
        let _guard = self.lock.lock();

        if let Some(existing) = self.resolve(key) {
            return Ok(existing);
        }

        let statement = conn
            .prepare(query)
            .map_err(|e| PoolError::Compile(Box::new(e)))?;
        debug!(key, evictable, pinned, "Prepared statement");

        // An expired, unprotected entry may still sit in the cache unswept
        let stale = self.cache.peek(key);

        let entry = PoolEntry::new(statement, evictable, pinned);
        self.cache.add(key.to_string(), entry.clone());

        if let Some(stale) = stale {
            release(key, &stale);
        }
        Ok(entry)
    }

    /// Pin the statement for `key` and return its handle
    ///
    /// Pinned or non-evictable entries are found even past their TTL.
    pub fn mount(&self, key: &str) -> Result<Arc<S>> {
        let _guard = self.lock.lock();

        let mut entry = self
            .resolve(key)
            .ok_or_else(|| PoolError::NotFound(key.to_string()))?;
        entry.set_pinned(true);

        let statement = Arc::clone(entry.statement());
        self.cache.add(key.to_string(), entry);
        Ok(statement)
    }

    /// Unpin the statement for `key`; silently ignores unknown keys
    pub fn unmount(&self, key: &str) {
        let _guard = self.lock.lock();

        if let Some(mut entry) = self.resolve(key) {
            entry.set_pinned(false);
            self.cache.add(key.to_string(), entry);
        }
    }

    /// Overwrite the pin flag of a live, unexpired entry
    pub fn set(&self, key: &str, pinned: bool) {
        let _guard = self.lock.lock();

        if let Some(mut entry) = self.cache.get(key) {
            entry.set_pinned(pinned);
            self.cache.add(key.to_string(), entry);
        }
    }

    /// Expiry-aware fetch without changing the pin flag
    pub fn get(&self, key: &str) -> Result<PoolEntry<S>> {
        self.cache
            .get(key)
            .ok_or_else(|| PoolError::NotFound(key.to_string()))
    }

    /// Number of cached statements, expired-but-unswept included
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Keys of all cached statements, least recently used first
    pub fn keys(&self) -> Vec<String> {
        self.cache.keys()
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// Stop the background sweeper; cached statements are kept
    pub fn close(&self) {
        self.cache.close();
    }

    /// Unexpired entry, or a protected one regardless of expiry
    fn resolve(&self, key: &str) -> Option<PoolEntry<S>> {
        let fallback = self.cache.peek(key).filter(PoolEntry::is_protected);
        self.cache.get(key).or(fallback)
    }
}

/// Eviction callback: keep protected entries, close the rest
fn veto_or_release<S: Statement>(
    key: String,
    entry: PoolEntry<S>,
    ext: &mut Extender<'_, String, PoolEntry<S>>,
) {
    if entry.is_protected() {
        trace!(key = %key, pinned = entry.in_use(), "Keeping protected statement");
        ext.extend(key, entry);
        return;
    }
    release(&key, &entry);
}

fn release<S: Statement>(key: &str, entry: &PoolEntry<S>) {
    match entry.close() {
        Ok(()) => trace!(key, "Closed evicted statement"),
        Err(e) => warn!("Failed to close evicted statement for key {}: {}", key, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("mock failure: {0}")]
    struct MockError(String);

    #[derive(Debug)]
    struct MockStatement {
        query: String,
        closed: AtomicBool,
        fail_close: bool,
    }

    impl MockStatement {
        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl Statement for MockStatement {
        type Error = MockError;

        fn close(&self) -> std::result::Result<(), MockError> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                Err(MockError(format!("close {}", self.query)))
            } else {
                Ok(())
            }
        }
    }

    #[derive(Default)]
    struct MockConnection {
        prepared: AtomicUsize,
        fail_prepare: bool,
        fail_close: bool,
    }

    impl MockConnection {
        fn failing() -> Self {
            Self {
                fail_prepare: true,
                ..Default::default()
            }
        }

        fn prepared(&self) -> usize {
            self.prepared.load(Ordering::SeqCst)
        }
    }

    impl Prepare<MockStatement> for MockConnection {
        type Error = MockError;

        fn prepare(&self, query: &str) -> std::result::Result<MockStatement, MockError> {
            if self.fail_prepare {
                return Err(MockError(format!("syntax error near {}", query)));
            }
            self.prepared.fetch_add(1, Ordering::SeqCst);
            Ok(MockStatement {
                query: query.to_string(),
                closed: AtomicBool::new(false),
                fail_close: self.fail_close,
            })
        }
    }

    fn build(
        pool: &StatementPool<MockStatement>,
        conn: &MockConnection,
        key: &str,
        pinned: bool,
    ) -> Arc<MockStatement> {
        let query = format!("SELECT * FROM {}", key);
        let entry = pool.build(key, &query, conn, true, pinned).unwrap();
        Arc::clone(entry.statement())
    }

    #[test]
    fn test_build_and_mount() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_secs(300));
        let conn = MockConnection::default();

        let entry = pool
            .build("user_query", "SELECT * FROM users WHERE id = ?", &conn, true, false)
            .unwrap();
        assert!(!entry.in_use());
        assert_eq!(entry.statement().query, "SELECT * FROM users WHERE id = ?");

        let mounted = pool.mount("user_query").unwrap();
        assert!(Arc::ptr_eq(&mounted, entry.statement()));
        assert!(pool.get("user_query").unwrap().in_use());
        assert_eq!(conn.prepared(), 1);
    }

    #[test]
    fn test_build_first_writer_wins() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_secs(300));
        let conn = MockConnection::default();
        let other = MockConnection::default();

        let first = pool.build("key", "SELECT 1", &conn, true, false).unwrap();
        let second = pool.build("key", "SELECT 2", &other, false, true).unwrap();

        assert!(Arc::ptr_eq(first.statement(), second.statement()));
        assert!(!second.in_use());
        assert!(second.is_evictable());
        assert_eq!(conn.prepared(), 1);
        assert_eq!(other.prepared(), 0);
    }

    #[test]
    fn test_build_compile_error() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_secs(300));
        let conn = MockConnection::failing();

        let err = pool.build("bad", "SELEC", &conn, true, false).unwrap_err();
        assert!(matches!(err, PoolError::Compile(_)));
        assert!(err.to_string().contains("syntax error near SELEC"));
        assert!(pool.is_empty());
        assert!(pool.get("bad").unwrap_err().is_not_found());
    }

    #[test]
    fn test_build_with_closure() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_secs(60));
        let prepare = |query: &str| -> std::result::Result<MockStatement, MockError> {
            Ok(MockStatement {
                query: query.to_string(),
                closed: AtomicBool::new(false),
                fail_close: false,
            })
        };

        let entry = pool.build("one", "SELECT 1", &prepare, true, false).unwrap();
        assert_eq!(entry.statement().query, "SELECT 1");
        assert!(pool.mount("one").is_ok());

        let reject = |query: &str| -> std::result::Result<MockStatement, MockError> {
            Err(MockError(format!("cannot prepare {}", query)))
        };
        let err = pool.build("two", "SELEC", &reject, true, false).unwrap_err();
        assert!(matches!(err, PoolError::Compile(_)));
        assert!(err.to_string().contains("cannot prepare SELEC"));
        assert_eq!(pool.keys(), vec!["one".to_string()]);
    }

    #[test]
    fn test_set_in_use_flag() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_secs(60));
        let conn = MockConnection::default();

        let entry = pool.build("key", "SELECT * FROM users", &conn, true, false).unwrap();
        assert!(!entry.in_use());

        pool.set("key", true);
        assert!(pool.get("key").unwrap().in_use());

        pool.set("key", false);
        assert!(!pool.get("key").unwrap().in_use());

        pool.set("missing", true);
        assert!(pool.get("missing").is_err());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_mount_unknown_key() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_secs(60));

        let err = pool.mount("zzz").unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Statement not found: zzz");
    }

    #[test]
    fn test_unmount_unknown_key_is_noop() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_secs(60));

        pool.unmount("zzz");
        assert!(pool.is_empty());
    }

    #[test]
    fn test_eviction_closes_statement() {
        let pool: StatementPool<MockStatement> = StatementPool::new(1, Duration::from_millis(100));
        let conn = MockConnection::default();

        let q1 = build(&pool, &conn, "q1", false);
        build(&pool, &conn, "q2", false); // Evicts q1

        thread::sleep(Duration::from_millis(200));

        assert!(q1.is_closed());
        assert!(pool.mount("q1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_pinned_survives_capacity_pressure() {
        let pool: StatementPool<MockStatement> = StatementPool::new(2, Duration::ZERO);
        let conn = MockConnection::default();

        let q1 = build(&pool, &conn, "q1", true);
        for key in ["q2", "q3", "q4", "q5"] {
            build(&pool, &conn, key, false);
        }

        let mounted = pool.mount("q1").unwrap();
        assert!(Arc::ptr_eq(&mounted, &q1));
        assert!(!q1.is_closed());
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_unpin_then_evict() {
        let pool: StatementPool<MockStatement> = StatementPool::new(2, Duration::ZERO);
        let conn = MockConnection::default();

        let q1 = build(&pool, &conn, "q1", true);
        build(&pool, &conn, "q2", false);
        build(&pool, &conn, "q3", false);
        assert!(pool.mount("q1").is_ok());

        pool.unmount("q1");
        assert!(!pool.get("q1").unwrap().in_use());

        for key in ["q4", "q5", "q6"] {
            build(&pool, &conn, key, false);
        }

        assert!(pool.mount("q1").unwrap_err().is_not_found());
        assert!(q1.is_closed());
    }

    #[test]
    fn test_non_evictable_survives() {
        let pool: StatementPool<MockStatement> = StatementPool::new(1, Duration::ZERO);
        let conn = MockConnection::default();

        let entry = pool.build("fixed", "SELECT 1", &conn, false, false).unwrap();
        build(&pool, &conn, "q2", false);
        build(&pool, &conn, "q3", false);

        let mounted = pool.mount("fixed").unwrap();
        assert!(Arc::ptr_eq(&mounted, entry.statement()));
        assert!(!mounted.is_closed());

        // Unmounting does not make it evictable
        pool.unmount("fixed");
        build(&pool, &conn, "q4", false);
        assert!(pool.mount("fixed").is_ok());
    }

    #[test]
    fn test_pinned_survives_ttl_sweep() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_millis(50));
        let conn = MockConnection::default();

        let pinned = build(&pool, &conn, "q1", true);
        let unpinned = build(&pool, &conn, "q2", false);

        thread::sleep(Duration::from_millis(300));

        assert!(pool.mount("q1").is_ok());
        assert!(!pinned.is_closed());
        assert!(pool.mount("q2").unwrap_err().is_not_found());
        assert!(unpinned.is_closed());
    }

    #[test]
    fn test_mount_falls_back_to_expired_pinned_entry() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_millis(50));
        pool.close(); // Keep expired entries around
        let conn = MockConnection::default();

        let pinned = build(&pool, &conn, "pinned", true);
        build(&pool, &conn, "plain", false);

        thread::sleep(Duration::from_millis(100));

        // Expiry-aware lookups miss both
        assert!(pool.get("pinned").is_err());
        assert!(pool.get("plain").is_err());

        let mounted = pool.mount("pinned").unwrap();
        assert!(Arc::ptr_eq(&mounted, &pinned));
        assert!(pool.mount("plain").unwrap_err().is_not_found());

        // The mount refreshed the expiry
        assert!(pool.get("pinned").is_ok());
    }

    #[test]
    fn test_build_replaces_expired_entry() {
        let pool: StatementPool<MockStatement> = StatementPool::new(10, Duration::from_millis(50));
        pool.close();
        let conn = MockConnection::default();

        let old = build(&pool, &conn, "q", false);
        thread::sleep(Duration::from_millis(100));
        let new = build(&pool, &conn, "q", false);

        assert!(!Arc::ptr_eq(&old, &new));
        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert_eq!(conn.prepared(), 2);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_release_failure_is_swallowed() {
        let pool: StatementPool<MockStatement> = StatementPool::new(1, Duration::ZERO);
        let conn = MockConnection {
            fail_close: true,
            ..Default::default()
        };

        let q1 = build(&pool, &conn, "q1", false);
        build(&pool, &conn, "q2", false);

        assert!(q1.is_closed());
        assert_eq!(pool.keys(), vec!["q2".to_string()]);
    }

    #[test]
    fn test_concurrent_mount_same_handle() {
        let pool = Arc::new(StatementPool::<MockStatement>::new(10, Duration::from_millis(100)));
        let conn = MockConnection::default();

        let q1 = build(&pool, &conn, "q1", true);
        build(&pool, &conn, "q2", false);

        thread::sleep(Duration::from_millis(200));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let expected = Arc::clone(&q1);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let mounted = pool.mount("q1").unwrap();
                        assert!(Arc::ptr_eq(&mounted, &expected));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(conn.prepared(), 2);
        assert!(!q1.is_closed());
    }
}
