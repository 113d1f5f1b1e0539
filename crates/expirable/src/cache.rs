//! Expirable LRU cache
//!
//! One mutex guards the key map, the recency list and the expiry buckets.
//! Every physical removal (capacity, sweep, explicit remove, purge) goes
//! through a single routine that invokes the eviction callback while the
//! lock is held. The callback receives an [`Extender`] to re-admit entries.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ahash::RandomState;
use parking_lot::Mutex;
use tracing::{debug, error, trace, warn};

use crate::buckets::ExpiryBuckets;
use crate::config::CacheConfig;
use crate::list::RecencyList;
use crate::stats::CacheStats;
use crate::sweeper::{StopSignal, Sweeper};

/// Callback invoked for every entry physically removed from the cache
pub type EvictCallback<K, V> = Box<dyn Fn(K, V, &mut Extender<'_, K, V>) + Send + Sync>;

struct Entry<K, V> {
    key: K,
    value: V,
    expires_at: Option<Instant>,
    bucket: usize,
}

impl<K, V> Entry<K, V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }
}

#[derive(Debug, Clone, Copy)]
enum Removal {
    Evicted,
    Expired,
}

/// Result of [`Cache::resize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeOutcome {
    /// Entries discarded by the shrink
    pub evicted: usize,
    /// Entries still above the new capacity because the callback re-admitted them
    pub over_capacity: usize,
}

impl ResizeOutcome {
    /// Whether the cache now fits its capacity
    pub fn is_complete(&self) -> bool {
        self.over_capacity == 0
    }
}

/// Lock-guarded state
struct Inner<K, V> {
    map: HashMap<K, usize, RandomState>,
    list: RecencyList<Entry<K, V>>,
    buckets: ExpiryBuckets,
    capacity: usize,
    ttl: Option<Duration>,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone,
{
    fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            map: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            list: RecencyList::new(),
            buckets: ExpiryBuckets::new(),
            capacity,
            ttl,
        }
    }

    fn len(&self) -> usize {
        self.list.len()
    }

    fn lookup<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.map.get(key).copied()
    }

    /// Insert or refresh an entry without enforcing capacity
    fn upsert(&mut self, key: K, value: V, now: Instant) {
        let expires_at = self.ttl.and_then(|ttl| now.checked_add(ttl));

        if let Some(&idx) = self.map.get(&key) {
            self.list.move_to_front(idx);
            if let Some(entry) = self.list.get_mut(idx) {
                self.buckets.remove(idx, entry.bucket);
                entry.value = value;
                entry.expires_at = expires_at;
                entry.bucket = self.buckets.place(idx, expires_at);
            }
            return;
        }

        let idx = self.list.push_front(Entry {
            key: key.clone(),
            value,
            expires_at,
            bucket: 0,
        });
        let bucket = self.buckets.place(idx, expires_at);
        if let Some(entry) = self.list.get_mut(idx) {
            entry.bucket = bucket;
        }
        self.map.insert(key, idx);
    }

    /// Unlink an entry from the map, the list and its bucket
    fn detach(&mut self, idx: usize) -> Option<Entry<K, V>> {
        let entry = self.list.remove(idx)?;
        self.buckets.remove(idx, entry.bucket);
        self.map.remove(&entry.key);
        Some(entry)
    }
}

/// Insertion path for use inside an eviction callback only.
///
/// The callback runs with the cache lock held, so calling any [`Cache`]
/// method from it would deadlock. `Extender` writes straight into the locked
/// state instead. It never evicts; the operation that triggered the eviction
/// enforces capacity afterwards.
pub struct Extender<'a, K, V> {
    inner: &'a mut Inner<K, V>,
}

impl<K, V> Extender<'_, K, V>
where
    K: Hash + Eq + Clone,
{
    /// Insert or refresh an entry: front of the recency list, fresh expiry
    pub fn extend(&mut self, key: K, value: V) {
        self.inner.upsert(key, value, Instant::now());
    }

    /// Raw membership check
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.inner.map.contains_key(key)
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Check if no entries are stored
    pub fn is_empty(&self) -> bool {
        self.inner.list.is_empty()
    }
}

/// State shared with the sweeper thread
struct Shared<K, V> {
    state: Mutex<Inner<K, V>>,
    on_evict: Option<EvictCallback<K, V>>,
    stats: CacheStats,
}

impl<K, V> Shared<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Single removal routine; returns true if the entry stayed out
    fn remove_entry(&self, inner: &mut Inner<K, V>, idx: usize, cause: Removal) -> bool {
        let entry = match inner.detach(idx) {
            Some(entry) => entry,
            None => return false,
        };

        match cause {
            Removal::Evicted => self.stats.record_eviction(),
            Removal::Expired => self.stats.record_expiration(),
        }

        let on_evict = match &self.on_evict {
            Some(on_evict) => on_evict,
            None => return true,
        };

        let key = entry.key.clone();
        on_evict(entry.key, entry.value, &mut Extender { inner: &mut *inner });

        if inner.map.contains_key(&key) {
            trace!(?cause, "Eviction vetoed, entry re-admitted");
            false
        } else {
            true
        }
    }

    /// Evict from the tail until within capacity, giving up after `len` attempts
    fn enforce_capacity(&self, inner: &mut Inner<K, V>) -> usize {
        if inner.capacity == 0 {
            return 0;
        }

        let mut attempts = inner.len();
        let mut evicted = 0;
        while inner.len() > inner.capacity && attempts > 0 {
            attempts -= 1;
            match inner.list.back() {
                Some(idx) => {
                    if self.remove_entry(inner, idx, Removal::Evicted) {
                        evicted += 1;
                    }
                }
                None => break,
            }
        }
        evicted
    }

    /// Sweep the slot under the sweep pointer, then advance it
    fn sweep_next(&self, signal: &StopSignal) {
        let (slot, watermark) = {
            let inner = self.state.lock();
            let slot = inner.buckets.next_sweep();
            (slot, inner.buckets.watermark(slot))
        };

        // Entries may have been placed late in the cycle; wait for the newest
        if let Some(deadline) = watermark {
            if deadline > Instant::now() && signal.wait_until(deadline) {
                return;
            }
        }

        let mut inner = self.state.lock();
        let due = inner.buckets.take(slot);
        let mut removed = 0;
        for idx in due {
            let in_slot = inner
                .list
                .get(idx)
                .map_or(false, |entry| entry.bucket == slot);
            if in_slot && self.remove_entry(&mut inner, idx, Removal::Expired) {
                removed += 1;
            }
        }
        inner.buckets.advance();

        if removed > 0 {
            debug!(slot, removed, "Swept expired entries");
        }
    }
}

/// Thread-safe LRU cache with TTL expiry
pub struct Cache<K, V> {
    shared: Arc<Shared<K, V>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Create a cache without an eviction callback
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of entries, 0 for unbounded
    /// * `ttl` - Entry lifetime, zero for no expiry
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self::from_config(CacheConfig::new(capacity, ttl), None)
    }

    /// Create a cache that calls `on_evict` for every removed entry
    pub fn with_callback<F>(capacity: usize, ttl: Duration, on_evict: F) -> Self
    where
        F: Fn(K, V, &mut Extender<'_, K, V>) + Send + Sync + 'static,
    {
        Self::from_config(CacheConfig::new(capacity, ttl), Some(Box::new(on_evict)))
    }

    /// Create a cache from a configuration
    ///
    /// A sweeper thread is started when the TTL is finite. If the thread
    /// cannot be spawned the cache still works, relying on lazy expiry.
    pub fn from_config(config: CacheConfig, on_evict: Option<EvictCallback<K, V>>) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(Inner::new(config.capacity, config.expiry())),
            on_evict,
            stats: CacheStats::new(),
        });

        let sweeper = config.sweep_interval().and_then(|interval| {
            let worker = Arc::clone(&shared);
            match Sweeper::spawn(interval, move |signal| worker.sweep_next(signal)) {
                Ok(sweeper) => {
                    debug!(?interval, "Started expiry sweeper");
                    Some(sweeper)
                }
                Err(e) => {
                    error!("Failed to start expiry sweeper: {}", e);
                    None
                }
            }
        });

        Self {
            shared,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Insert or update an entry
    ///
    /// Returns true if an entry was discarded to respect the capacity.
    pub fn add(&self, key: K, value: V) -> bool {
        let mut inner = self.shared.state.lock();
        inner.upsert(key, value, Instant::now());
        self.shared.stats.record_insert();
        self.shared.enforce_capacity(&mut inner) > 0
    }

    /// Expiry-aware read that promotes the entry on a hit
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.shared.state.lock();
        let now = Instant::now();

        let hit = inner.lookup(key).and_then(|idx| {
            inner
                .list
                .get(idx)
                .filter(|entry| !entry.is_expired(now))
                .map(|entry| (idx, entry.value.clone()))
        });

        match hit {
            Some((idx, value)) => {
                inner.list.move_to_front(idx);
                self.shared.stats.record_hit();
                Some(value)
            }
            None => {
                self.shared.stats.record_miss();
                None
            }
        }
    }

    /// Raw read: ignores expiry and leaves the recency order alone
    pub fn peek<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let inner = self.shared.state.lock();
        inner
            .lookup(key)
            .and_then(|idx| inner.list.get(idx))
            .map(|entry| entry.value.clone())
    }

    /// Raw membership check, expired-but-unswept keys included
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared.state.lock().map.contains_key(key)
    }

    /// Remove an entry, invoking the eviction callback
    ///
    /// Returns true if the key was present.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut inner = self.shared.state.lock();
        match inner.lookup(key) {
            Some(idx) => {
                self.shared.remove_entry(&mut inner, idx, Removal::Evicted);
                true
            }
            None => false,
        }
    }

    /// Least recently used entry, without touching it
    pub fn get_oldest(&self) -> Option<(K, V)> {
        let inner = self.shared.state.lock();
        inner
            .list
            .back()
            .and_then(|idx| inner.list.get(idx))
            .map(|entry| (entry.key.clone(), entry.value.clone()))
    }

    /// Remove the least recently used entry, invoking the eviction callback
    pub fn remove_oldest(&self) -> Option<(K, V)> {
        let mut inner = self.shared.state.lock();
        let idx = inner.list.back()?;
        let oldest = inner
            .list
            .get(idx)
            .map(|entry| (entry.key.clone(), entry.value.clone()))?;
        self.shared.remove_entry(&mut inner, idx, Removal::Evicted);
        Some(oldest)
    }

    /// All stored keys, oldest first, expired-but-unswept keys included
    pub fn keys(&self) -> Vec<K> {
        let inner = self.shared.state.lock();
        inner.list.iter_oldest().map(|entry| entry.key.clone()).collect()
    }

    /// Values of unexpired entries, oldest first
    pub fn values(&self) -> Vec<V> {
        let inner = self.shared.state.lock();
        let now = Instant::now();
        inner
            .list
            .iter_oldest()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
            .collect()
    }

    /// Number of stored entries, expired-but-unswept entries included
    pub fn len(&self) -> usize {
        self.shared.state.lock().len()
    }

    /// Check if the cache stores no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current capacity, 0 meaning unbounded
    pub fn capacity(&self) -> usize {
        self.shared.state.lock().capacity
    }

    /// Change the capacity, evicting from the tail as needed
    ///
    /// A capacity of 0 disables capacity eviction. The shrink makes at most
    /// one attempt per stored entry, so entries the callback keeps
    /// re-admitting are reported in `over_capacity` instead of looping.
    pub fn resize(&self, capacity: usize) -> ResizeOutcome {
        let mut inner = self.shared.state.lock();
        inner.capacity = capacity;

        let evicted = self.shared.enforce_capacity(&mut inner);
        let over_capacity = if capacity == 0 {
            0
        } else {
            inner.len().saturating_sub(capacity)
        };

        if over_capacity > 0 {
            warn!(
                capacity,
                over_capacity, "Resize incomplete, evictions were vetoed"
            );
        }

        ResizeOutcome {
            evicted,
            over_capacity,
        }
    }

    /// Remove every entry, invoking the eviction callback for each
    ///
    /// Entries the callback re-admits are kept.
    pub fn purge(&self) {
        let mut inner = self.shared.state.lock();
        let drained = inner.list.drain();
        inner.map.clear();
        inner.buckets.clear();

        for entry in drained {
            self.shared.stats.record_eviction();
            if let Some(on_evict) = &self.shared.on_evict {
                on_evict(entry.key, entry.value, &mut Extender { inner: &mut *inner });
            }
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }
}

impl<K, V> Cache<K, V> {
    /// Stop the background sweeper and wait for it to exit
    ///
    /// Stored entries are kept and reads still honor the TTL; expired
    /// entries are simply no longer removed in the background.
    pub fn close(&self) {
        let sweeper = self.sweeper.lock().take();
        if let Some(mut sweeper) = sweeper {
            sweeper.stop();
        }
    }

    /// Whether a background sweeper is running
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.lock().is_some()
    }
}

impl<K, V> Drop for Cache<K, V> {
    fn drop(&mut self) {
        self.close();
    }
}
