//! In-memory connection standing in for a database driver

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use stmtpool::{Prepare, Statement};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("empty query")]
    EmptyQuery,

    #[error("statement {0} already closed")]
    AlreadyClosed(u64),
}

pub struct MemoryStatement {
    id: u64,
    closed: AtomicBool,
}

impl MemoryStatement {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Statement for MemoryStatement {
    type Error = MemoryError;

    fn close(&self) -> Result<(), MemoryError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(MemoryError::AlreadyClosed(self.id));
        }
        Ok(())
    }
}

/// Counts how often each query text was prepared
#[derive(Default)]
pub struct MemoryConnection {
    next_id: AtomicU64,
    prepared: Mutex<HashMap<String, usize>>,
}

impl MemoryConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prepared_count(&self, query: &str) -> usize {
        self.prepared.lock().get(query).copied().unwrap_or(0)
    }

    pub fn total_prepared(&self) -> usize {
        self.prepared.lock().values().sum()
    }
}

impl Prepare<MemoryStatement> for MemoryConnection {
    type Error = MemoryError;

    fn prepare(&self, query: &str) -> Result<MemoryStatement, MemoryError> {
        if query.trim().is_empty() {
            return Err(MemoryError::EmptyQuery);
        }

        *self.prepared.lock().entry(query.to_string()).or_insert(0) += 1;
        Ok(MemoryStatement {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            closed: AtomicBool::new(false),
        })
    }
}
