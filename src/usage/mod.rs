mod snapshot;

pub use snapshot::{MetricsSnapshot, ValidationError};

use std::{
    collections::VecDeque,
    sync::{Arc, PoisonError, RwLock},
};

/// In-memory store for pushed usage snapshots: the latest one plus a bounded
/// oldest-to-newest history. Nothing is persisted across restarts.
#[derive(Clone)]
pub struct MetricsStore {
    capacity: usize,
    inner: Arc<RwLock<StoreState>>,
}

#[derive(Default)]
struct StoreState {
    latest: Option<MetricsSnapshot>,
    history: VecDeque<MetricsSnapshot>,
}

impl MetricsStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: Arc::new(RwLock::new(StoreState {
                latest: None,
                history: VecDeque::with_capacity(capacity),
            })),
        }
    }

    /// Validates `snapshot`, then records it as the latest entry and appends it
    /// to the history, evicting the oldest entries beyond capacity.
    pub fn update(&self, snapshot: MetricsSnapshot) -> Result<(), ValidationError> {
        if let Err(err) = snapshot.validate() {
            tracing::warn!(error = %err, "rejected usage snapshot");
            return Err(err);
        }

        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.latest = Some(snapshot.clone());
        guard.history.push_back(snapshot);

        let mut evicted = 0usize;
        while guard.history.len() > self.capacity {
            guard.history.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(evicted, capacity = self.capacity, "evicted usage snapshots");
        }
        Ok(())
    }

    pub fn latest(&self) -> Option<MetricsSnapshot> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.latest.clone()
    }

    /// Returns a copy of the history ordered from oldest to newest.
    pub fn history(&self) -> Vec<MetricsSnapshot> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.history.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
