//! Set of running supervisors, keyed by task id

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveEntry {
    generation: u64,
    cancel: CancellationToken,
}

/// Cancellation handles of running supervisors
///
/// Holds at most one entry per task id. Each entry carries a generation so a
/// supervisor that exits late cannot remove the entry of its successor.
#[derive(Debug, Default)]
pub struct ActiveMonitorSet {
    entries: RwLock<HashMap<String, ActiveEntry>>,
    next_generation: AtomicU64,
}

impl ActiveMonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle unless the id is already present
    ///
    /// Check and insert happen under one write lock. Returns the entry's
    /// generation on success.
    pub fn try_insert(&self, task_id: &str, cancel: CancellationToken) -> Option<u64> {
        let mut entries = self.entries.write().expect("ActiveMonitorSet lock poisoned");
        if entries.contains_key(task_id) {
            return None;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        entries.insert(task_id.to_string(), ActiveEntry { generation, cancel });
        Some(generation)
    }

    /// Remove an entry if it still belongs to the given generation
    pub fn remove(&self, task_id: &str, generation: u64) -> bool {
        let mut entries = self.entries.write().expect("ActiveMonitorSet lock poisoned");
        match entries.get(task_id) {
            Some(entry) if entry.generation == generation => {
                entries.remove(task_id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.entries
            .read()
            .expect("ActiveMonitorSet lock poisoned")
            .contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("ActiveMonitorSet lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every handle, then clear the set. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut entries = self.entries.write().expect("ActiveMonitorSet lock poisoned");
        for entry in entries.values() {
            entry.cancel.cancel();
        }
        let cancelled = entries.len();
        entries.clear();
        cancelled
    }
}
