//! Per-group mutual exclusion.
//!
//! Each group ID maps to a lock created on demand. The registry only holds
//! weak handles, so a lock lives exactly as long as someone is using it,
//! and dead entries are swept as the map grows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::types::GroupId;

/// The map is swept once it reaches this many entries, then again at
/// twice its surviving size.
const MIN_SWEEP_AT: usize = 64;

#[derive(Debug)]
struct Slots {
    locks: HashMap<GroupId, Weak<Mutex<()>>>,
    sweep_at: usize,
}

impl Default for Slots {
    fn default() -> Self {
        Self {
            locks: HashMap::new(),
            sweep_at: MIN_SWEEP_AT,
        }
    }
}

/// Registry of group-scoped locks.
#[derive(Debug, Default)]
pub struct LockRegistry {
    slots: Mutex<Slots>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, group_id: &GroupId) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = slots.locks.get(group_id).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(Mutex::new(()));
        slots.locks.insert(group_id.clone(), Arc::downgrade(&lock));
        if slots.locks.len() >= slots.sweep_at {
            slots.locks.retain(|_, weak| weak.strong_count() > 0);
            slots.sweep_at = (slots.locks.len() * 2).max(MIN_SWEEP_AT);
        }
        lock
    }

    /// Runs `f` while holding the exclusive scope of `group_id`.
    ///
    /// Calls for the same group are serialized; calls for different groups
    /// do not contend beyond the registry lookup. The scope is released on
    /// every exit from `f`, including unwinding.
    pub fn scoped<R>(&self, group_id: &GroupId, f: impl FnOnce() -> R) -> R {
        let slot = self.slot(group_id);
        let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }

    /// Number of registry entries, live or not yet swept.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .locks
            .len()
    }
}
