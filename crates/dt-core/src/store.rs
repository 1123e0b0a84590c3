//! Durable storage of tracker groups: the source of truth.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::BackendError;
use crate::group::TrackerGroup;
use crate::tracker::Tracker;
use crate::types::{GroupId, TrackerName};

/// Store backend contract.
///
/// A group is one document keyed by group ID, holding one sub-document per
/// tracker keyed by name. Loading a group with no trackers is a miss.
pub trait Store: Send + Sync {
    fn load(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError>;

    /// Replaces the whole group document.
    fn save(&self, group: &TrackerGroup) -> Result<(), BackendError>;

    /// Upserts the given trackers' sub-documents. New names are appended
    /// after the existing ones.
    fn save_trackers(&self, group_id: &GroupId, trackers: &[&Tracker]) -> Result<(), BackendError>;

    /// Deletes one tracker, or the whole group when `name` is `None`.
    fn delete(&self, group_id: &GroupId, name: Option<&TrackerName>) -> Result<(), BackendError>;

    /// Deletes every group.
    fn clear(&self) -> Result<(), BackendError>;
}

impl<T: Store + ?Sized> Store for Arc<T> {
    fn load(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError> {
        (**self).load(group_id)
    }

    fn save(&self, group: &TrackerGroup) -> Result<(), BackendError> {
        (**self).save(group)
    }

    fn save_trackers(&self, group_id: &GroupId, trackers: &[&Tracker]) -> Result<(), BackendError> {
        (**self).save_trackers(group_id, trackers)
    }

    fn delete(&self, group_id: &GroupId, name: Option<&TrackerName>) -> Result<(), BackendError> {
        (**self).delete(group_id, name)
    }

    fn clear(&self) -> Result<(), BackendError> {
        (**self).clear()
    }
}

/// Store held in process memory. Useful for tests and single-process use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    groups: RwLock<HashMap<GroupId, TrackerGroup>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored groups.
    pub fn len(&self) -> usize {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn load(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError> {
        let groups = self.groups.read().unwrap_or_else(PoisonError::into_inner);
        Ok(groups.get(group_id).cloned())
    }

    fn save(&self, group: &TrackerGroup) -> Result<(), BackendError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        if group.is_empty() {
            groups.remove(group.group_id());
        } else {
            groups.insert(group.group_id().clone(), group.clone());
        }
        Ok(())
    }

    fn save_trackers(&self, group_id: &GroupId, trackers: &[&Tracker]) -> Result<(), BackendError> {
        if trackers.is_empty() {
            return Ok(());
        }
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let group = groups
            .entry(group_id.clone())
            .or_insert_with(|| TrackerGroup::new(group_id.clone()));
        for tracker in trackers {
            group.upsert(tracker.snapshot());
        }
        Ok(())
    }

    fn delete(&self, group_id: &GroupId, name: Option<&TrackerName>) -> Result<(), BackendError> {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        match name {
            None => {
                groups.remove(group_id);
            }
            Some(name) => {
                if let Some(group) = groups.get_mut(group_id) {
                    group.remove(name);
                    if group.is_empty() {
                        groups.remove(group_id);
                    }
                }
            }
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.groups
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> TrackerName {
        TrackerName::new(s).unwrap()
    }

    #[test]
    fn save_trackers_upserts_and_appends() {
        let store = MemoryStore::new();
        let id = GroupId::new("g").unwrap();
        let a = Tracker::count(name("a"), [1.0]);
        let b = Tracker::count(name("b"), [1.0]);
        store.save_trackers(&id, &[&a, &b]).unwrap();

        let a2 = Tracker::count(name("a"), [5.0]);
        store.save_trackers(&id, &[&a2]).unwrap();

        let loaded = store.load(&id).unwrap().unwrap();
        let names: Vec<_> = loaded.trackers().iter().map(|t| t.name().as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(loaded.get(&name("a")).unwrap().targets(), [5.0]);
    }

    #[test]
    fn deleting_last_tracker_removes_group() {
        let store = MemoryStore::new();
        let id = GroupId::new("g").unwrap();
        let a = Tracker::count(name("a"), [1.0]);
        store.save_trackers(&id, &[&a]).unwrap();

        store.delete(&id, Some(&name("a"))).unwrap();
        assert_eq!(store.load(&id).unwrap(), None);
        assert!(store.is_empty());
    }
}
