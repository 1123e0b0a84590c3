//! Fast-path storage of tracker groups.
//!
//! The cache is never the source of truth: entries may expire or be
//! evicted at any time, and the engine falls back to the store on a miss.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::error::BackendError;
use crate::group::TrackerGroup;
use crate::types::GroupId;

/// Cache backend contract.
pub trait Cache: Send + Sync {
    fn get(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError>;

    /// Stores the group, expiring after `ttl` if given.
    fn set(&self, group: &TrackerGroup, ttl: Option<Duration>) -> Result<(), BackendError>;

    fn delete(&self, group_id: &GroupId) -> Result<(), BackendError>;

    fn exists(&self, group_id: &GroupId) -> Result<bool, BackendError>;

    /// Drops every entry.
    fn clear(&self) -> Result<(), BackendError>;
}

impl<T: Cache + ?Sized> Cache for Arc<T> {
    fn get(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError> {
        (**self).get(group_id)
    }

    fn set(&self, group: &TrackerGroup, ttl: Option<Duration>) -> Result<(), BackendError> {
        (**self).set(group, ttl)
    }

    fn delete(&self, group_id: &GroupId) -> Result<(), BackendError> {
        (**self).delete(group_id)
    }

    fn exists(&self, group_id: &GroupId) -> Result<bool, BackendError> {
        (**self).exists(group_id)
    }

    fn clear(&self) -> Result<(), BackendError> {
        (**self).clear()
    }
}

#[derive(Debug)]
struct Entry {
    group: TrackerGroup,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Non-durable cache held in process memory.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<GroupId, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().filter(|entry| entry.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict(&self, group_id: &GroupId, now: Instant) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if entries.get(group_id).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(group_id);
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(group_id) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.group.clone())),
                Some(_) => {}
            }
        }
        self.evict(group_id, now);
        Ok(None)
    }

    fn set(&self, group: &TrackerGroup, ttl: Option<Duration>) -> Result<(), BackendError> {
        let entry = Entry {
            group: group.clone(),
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(group.group_id().clone(), entry);
        Ok(())
    }

    fn delete(&self, group_id: &GroupId) -> Result<(), BackendError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(group_id);
        Ok(())
    }

    fn exists(&self, group_id: &GroupId) -> Result<bool, BackendError> {
        Ok(self.get(group_id)?.is_some())
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}
