//! The per-group set of trackers: unit of storage and of locking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tracker::Tracker;
use crate::types::{GroupId, TrackerName};

/// Trackers of one group, in insertion order, with unique names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerGroup {
    group_id: GroupId,
    #[serde(default)]
    trackers: Vec<Tracker>,
}

impl TrackerGroup {
    pub const fn new(group_id: GroupId) -> Self {
        Self {
            group_id,
            trackers: Vec::new(),
        }
    }

    pub const fn group_id(&self) -> &GroupId {
        &self.group_id
    }

    pub fn trackers(&self) -> &[Tracker] {
        &self.trackers
    }

    pub(crate) fn trackers_mut(&mut self) -> impl Iterator<Item = &mut Tracker> {
        self.trackers.iter_mut()
    }

    pub fn get(&self, name: &TrackerName) -> Option<&Tracker> {
        self.trackers.iter().find(|t| t.name() == name)
    }

    pub(crate) fn get_mut(&mut self, name: &TrackerName) -> Option<&mut Tracker> {
        self.trackers.iter_mut().find(|t| t.name() == name)
    }

    pub fn contains(&self, name: &TrackerName) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Appends a tracker, rejecting a duplicate name.
    pub fn insert(&mut self, tracker: Tracker) -> Result<(), ConfigError> {
        if self.contains(tracker.name()) {
            return Err(ConfigError::DuplicateName {
                group_id: self.group_id.clone(),
                name: tracker.name().clone(),
            });
        }
        self.trackers.push(tracker);
        Ok(())
    }

    /// Inserts or replaces by name, keeping the original position on replace.
    pub fn upsert(&mut self, tracker: Tracker) {
        match self.get_mut(tracker.name()) {
            Some(existing) => *existing = tracker,
            None => self.trackers.push(tracker),
        }
    }

    pub fn remove(&mut self, name: &TrackerName) -> Option<Tracker> {
        let index = self.trackers.iter().position(|t| t.name() == name)?;
        Some(self.trackers.remove(index))
    }

    pub(crate) fn drain(&mut self) -> Vec<Tracker> {
        std::mem::take(&mut self.trackers)
    }

    /// Removes and returns trackers whose expiration has passed.
    pub(crate) fn take_expired(&mut self, now: DateTime<Utc>) -> Vec<Tracker> {
        let (expired, live) = std::mem::take(&mut self.trackers)
            .into_iter()
            .partition(|t| t.is_expired(now));
        self.trackers = live;
        expired
    }

    pub(crate) fn mark_clean(&mut self) {
        for tracker in &mut self.trackers {
            tracker.mark_clean();
        }
    }
}
