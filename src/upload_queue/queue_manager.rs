//! Queue operations - the shared work queue and the retry set.
//!
//! Both structures are shared by every upload worker and guarded by a mutex;
//! pop-and-remove is a single critical section so no two workers see the
//! same unit.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use super::types::{FileWithCollection, LocalId};

/// Pending units of the current batch
#[derive(Clone, Debug, Default)]
pub struct WorkQueue {
    items: Arc<Mutex<VecDeque<FileWithCollection>>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the queue contents with a new batch.
    ///
    /// A local id already queued is dropped with a warning; returns the
    /// number of units queued.
    pub fn reset(&self, units: Vec<FileWithCollection>) -> usize {
        let mut seen: HashSet<LocalId> = HashSet::with_capacity(units.len());
        let mut deduped = VecDeque::with_capacity(units.len());

        for unit in units {
            if seen.insert(unit.local_id) {
                deduped.push_back(unit);
            } else {
                tracing::warn!(
                    local_id = unit.local_id,
                    "Duplicate local id in batch, skipping"
                );
            }
        }

        let count = deduped.len();
        match self.items.lock() {
            Ok(mut items) => *items = deduped,
            Err(poisoned) => *poisoned.into_inner() = deduped,
        }
        count
    }

    /// Atomically take the next unit. Workers pop from the tail.
    pub fn pop(&self) -> Option<FileWithCollection> {
        match self.items.lock() {
            Ok(mut items) => items.pop_back(),
            Err(poisoned) => poisoned.into_inner().pop_back(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut items) = self.items.lock() {
            items.clear();
        }
    }
}

/// Units whose terminal state was FAILED or BLOCKED
#[derive(Clone, Debug, Default)]
pub struct RetrySet {
    failed: Arc<Mutex<Vec<FileWithCollection>>>,
}

impl RetrySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, unit: FileWithCollection) {
        match self.failed.lock() {
            Ok(mut failed) => failed.push(unit),
            Err(poisoned) => poisoned.into_inner().push(unit),
        }
    }

    /// Remove and return every unit; the set is empty afterwards
    pub fn take(&self) -> Vec<FileWithCollection> {
        match self.failed.lock() {
            Ok(mut failed) => std::mem::take(&mut *failed),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    pub fn snapshot(&self) -> Vec<FileWithCollection> {
        self.failed
            .lock()
            .map(|failed| failed.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.failed.lock().map(|failed| failed.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut failed) = self.failed.lock() {
            failed.clear();
        }
    }
}
