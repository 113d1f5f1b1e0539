//! Bucketed lazy expiry
//!
//! Entries are grouped into a fixed ring of slots instead of carrying one
//! timer each. The sweeper visits one slot per tick; a (re)inserted entry is
//! always placed in the slot just behind the sweep pointer, so it is the last
//! slot to be visited and gets close to a full TTL before inspection.

use std::collections::HashSet;
use std::time::Instant;

use ahash::RandomState;

/// Number of slots in the ring
pub(crate) const NUM_BUCKETS: usize = 100;

#[derive(Default)]
struct Bucket {
    /// Slab handles of the member entries
    members: HashSet<usize, RandomState>,
    /// Latest expiry among entries placed here since the last sweep
    newest: Option<Instant>,
}

pub(crate) struct ExpiryBuckets {
    buckets: Vec<Bucket>,
    next_sweep: usize,
}

impl ExpiryBuckets {
    pub fn new() -> Self {
        Self {
            buckets: (0..NUM_BUCKETS).map(|_| Bucket::default()).collect(),
            next_sweep: 0,
        }
    }

    /// Add an entry to the slot behind the sweep pointer, returning the slot
    pub fn place(&mut self, idx: usize, expires_at: Option<Instant>) -> usize {
        let slot = (self.next_sweep + NUM_BUCKETS - 1) % NUM_BUCKETS;
        let bucket = &mut self.buckets[slot];
        bucket.members.insert(idx);
        if let Some(at) = expires_at {
            if bucket.newest.map_or(true, |newest| newest < at) {
                bucket.newest = Some(at);
            }
        }
        slot
    }

    pub fn remove(&mut self, idx: usize, slot: usize) {
        if let Some(bucket) = self.buckets.get_mut(slot) {
            bucket.members.remove(&idx);
        }
    }

    /// Latest expiry placed into `slot`
    pub fn watermark(&self, slot: usize) -> Option<Instant> {
        self.buckets.get(slot).and_then(|bucket| bucket.newest)
    }

    /// Empty a slot, returning its members
    pub fn take(&mut self, slot: usize) -> Vec<usize> {
        match self.buckets.get_mut(slot) {
            Some(bucket) => {
                bucket.newest = None;
                bucket.members.drain().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn next_sweep(&self) -> usize {
        self.next_sweep
    }

    pub fn advance(&mut self) {
        self.next_sweep = (self.next_sweep + 1) % NUM_BUCKETS;
    }

    /// Drop all memberships; the sweep pointer keeps its position
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.members.clear();
            bucket.newest = None;
        }
    }

    #[cfg(test)]
    fn members(&self, slot: usize) -> usize {
        self.buckets[slot].members.len()
    }
}
