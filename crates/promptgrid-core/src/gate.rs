//! Admission control for provider calls and per-cell runs.
//!
//! - [`AdmissionGate`] limits in-flight provider calls (capacity 1 by default).
//!   It rejects instead of queueing: a caller that can't get a permit gets
//!   [`ProviderError::Busy`] and should retry later.
//! - [`CellRunGuard`] stops two independent triggers (edit, interval timer,
//!   upstream cascade) from running the same cell at once. A trigger that
//!   arrives while the cell is running is coalesced into one follow-up run.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use promptgrid_engine::engine::CellKey;

use crate::provider::ProviderError;

/// Held while a provider call is in flight.
pub type AdmissionPermit = OwnedSemaphorePermit;

#[derive(Clone, Debug)]
pub struct AdmissionGate {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::with_capacity(1)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Take a permit or fail immediately with [`ProviderError::Busy`].
    pub fn try_admit(&self) -> Result<AdmissionPermit, ProviderError> {
        self.permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| ProviderError::Busy)
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks which cells are running, and whether another run was requested
/// while they were.
#[derive(Clone, Debug, Default)]
pub struct CellRunGuard {
    running: Arc<DashMap<CellKey, bool>>,
}

impl CellRunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for a run. If it's already running, record a follow-up
    /// request and return false.
    pub fn try_claim(&self, key: &CellKey) -> bool {
        match self.running.entry(key.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(false);
                true
            }
            Entry::Occupied(mut slot) => {
                slot.insert(true);
                false
            }
        }
    }

    /// Finish a run of `key`. If a follow-up was requested the claim is kept
    /// (with the request cleared) and true is returned; otherwise the claim
    /// is released.
    pub fn finish(&self, key: &CellKey) -> bool {
        match self.running.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                if *slot.get() {
                    slot.insert(false);
                    true
                } else {
                    slot.remove();
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn is_running(&self, key: &CellKey) -> bool {
        self.running.contains_key(key)
    }
}
