//! Pooled statement entry

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::statement::Statement;

/// Statement handle plus the flags the pool uses to protect it from eviction
pub struct PoolEntry<S> {
    statement: Arc<S>,
    pinned: bool,
    evictable: bool,
    last_updated: DateTime<Utc>,
}

impl<S: Statement> PoolEntry<S> {
    pub(crate) fn new(statement: S, evictable: bool, pinned: bool) -> Self {
        Self {
            statement: Arc::new(statement),
            pinned,
            evictable,
            last_updated: Utc::now(),
        }
    }

    /// Shared handle to the compiled statement
    pub fn statement(&self) -> &Arc<S> {
        &self.statement
    }

    /// Whether the statement is pinned by a caller
    pub fn in_use(&self) -> bool {
        self.pinned
    }

    /// Whether the statement may ever be evicted
    pub fn is_evictable(&self) -> bool {
        self.evictable
    }

    /// When the statement was prepared
    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Release the statement; a no-op for non-evictable entries
    pub fn close(&self) -> Result<(), S::Error> {
        if self.evictable {
            self.statement.close()
        } else {
            Ok(())
        }
    }

    /// Pinned or never evictable
    pub(crate) fn is_protected(&self) -> bool {
        self.pinned || !self.evictable
    }

    pub(crate) fn set_pinned(&mut self, pinned: bool) {
        self.pinned = pinned;
    }
}

// Manual impl: cloning shares the handle, so `S` need not be `Clone`
impl<S> Clone for PoolEntry<S> {
    fn clone(&self) -> Self {
        Self {
            statement: Arc::clone(&self.statement),
            pinned: self.pinned,
            evictable: self.evictable,
            last_updated: self.last_updated,
        }
    }
}

impl<S> fmt::Debug for PoolEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolEntry")
            .field("pinned", &self.pinned)
            .field("evictable", &self.evictable)
            .field("last_updated", &self.last_updated)
            .finish_non_exhaustive()
    }
}
