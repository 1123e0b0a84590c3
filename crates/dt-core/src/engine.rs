//! The tracking engine: per-group atomic load, evaluate, persist.
//!
//! Every mutation of a group runs inside that group's exclusive scope.
//! Persistence is write-through with the store first: a cache failure
//! after a durable write is repaired by the next load from the store.
//!
//! Lifecycle events are collected while the scope is held and dispatched
//! after it is released and persistence has succeeded, so listeners may
//! call back into the engine.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::bus::{EventBus, EventKind, Listener, TrackerEvent};
use crate::cache::Cache;
use crate::condition::CustomCondition;
use crate::error::{ConfigError, Error, EvaluationError, Result};
use crate::event::Event;
use crate::extension::Extensions;
use crate::group::TrackerGroup;
use crate::limiter::CustomLimiter;
use crate::locks::LockRegistry;
use crate::store::Store;
use crate::tracker::{ResetPolicy, Tracker};
use crate::types::{GroupId, TrackerName};

/// Receives every contained evaluation and listener failure.
pub type ErrorHook = Arc<dyn Fn(&EvaluationError) + Send + Sync>;

const fn default_remove_completed() -> bool {
    true
}

/// Engine behaviour knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Lifetime of cache entries. `None` keeps them until evicted.
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    /// Drop trackers from their group once fully completed.
    #[serde(default = "default_remove_completed")]
    pub remove_completed: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: None,
            remove_completed: default_remove_completed(),
        }
    }
}

impl EngineConfig {
    fn cache_ttl(&self) -> Option<StdDuration> {
        self.cache_ttl_secs.map(StdDuration::from_secs)
    }
}

/// Expiration requested when adding a tracker.
///
/// When both are set the earlier instant wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Expiry {
    /// Relative to the time of the add.
    pub expire: Option<Duration>,
    pub expire_at: Option<DateTime<Utc>>,
}

impl Expiry {
    pub const fn never() -> Self {
        Self {
            expire: None,
            expire_at: None,
        }
    }

    pub fn after(expire: Duration) -> Self {
        Self {
            expire: Some(expire),
            expire_at: None,
        }
    }

    pub fn at(expire_at: DateTime<Utc>) -> Self {
        Self {
            expire: None,
            expire_at: Some(expire_at),
        }
    }

    /// The effective absolute expiration for an add at `now`.
    pub fn resolve(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let relative = self.expire.map(|ttl| now + ttl);
        match (relative, self.expire_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// What a `track` call changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Trackers whose persisted state changed.
    pub dirtied: Vec<Tracker>,
    /// Trackers that reached their final target.
    pub completed: Vec<Tracker>,
    /// Trackers that became limited during this call.
    pub limited: Vec<Tracker>,
    /// Contained condition, limiter and listener failures.
    pub errors: Vec<EvaluationError>,
}

impl Outcome {
    /// True if nothing changed.
    pub fn is_noop(&self) -> bool {
        self.dirtied.is_empty()
    }
}

/// Result of a batched add.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddReport {
    pub added: Vec<TrackerName>,
    pub rejected: Vec<ConfigError>,
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    cache: Box<dyn Cache>,
    store: Box<dyn Store>,
    config: EngineConfig,
    extensions: Extensions,
    error_hook: Option<ErrorHook>,
}

impl EngineBuilder {
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a custom condition referenced as `Condition::Custom { name, .. }`.
    #[must_use]
    pub fn condition(
        mut self,
        name: impl Into<String>,
        condition: impl CustomCondition + 'static,
    ) -> Self {
        self.extensions.register_condition(name, condition);
        self
    }

    /// Registers a custom limiter referenced as `LimitPolicy::Custom { name, .. }`.
    #[must_use]
    pub fn limiter(mut self, name: impl Into<String>, limiter: impl CustomLimiter + 'static) -> Self {
        self.extensions.register_limiter(name, limiter);
        self
    }

    /// Replaces the default hook, which logs with `tracing::warn!`.
    #[must_use]
    pub fn error_hook(mut self, hook: impl Fn(&EvaluationError) + Send + Sync + 'static) -> Self {
        self.error_hook = Some(Arc::new(hook));
        self
    }

    pub fn build(self) -> Engine {
        let error_hook = self.error_hook.unwrap_or_else(|| {
            Arc::new(|err: &EvaluationError| {
                tracing::warn!(
                    group_id = %err.group_id,
                    tracker = %err.tracker,
                    origin = %err.origin,
                    error = %err.message,
                    "contained evaluation failure"
                );
            })
        });
        Engine {
            cache: self.cache,
            store: self.store,
            config: self.config,
            extensions: self.extensions,
            bus: EventBus::default(),
            locks: LockRegistry::new(),
            error_hook,
        }
    }
}

/// Evaluates events against per-group trackers with write-through persistence.
///
/// `Engine` is `Send + Sync`; share it between threads with `Arc`.
pub struct Engine {
    cache: Box<dyn Cache>,
    store: Box<dyn Store>,
    config: EngineConfig,
    extensions: Extensions,
    bus: EventBus,
    locks: LockRegistry,
    error_hook: ErrorHook,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("extensions", &self.extensions)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn builder(cache: impl Cache + 'static, store: impl Store + 'static) -> EngineBuilder {
        EngineBuilder {
            cache: Box::new(cache),
            store: Box::new(store),
            config: EngineConfig::default(),
            extensions: Extensions::default(),
            error_hook: None,
        }
    }

    /// Builds an engine with default configuration and no extensions.
    pub fn new(cache: impl Cache + 'static, store: impl Store + 'static) -> Self {
        Self::builder(cache, store).build()
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========== Listeners ==========

    /// Registers a listener. Returns false if it was already registered for `kind`.
    pub fn add_listener(&self, kind: EventKind, listener: Arc<dyn Listener>) -> bool {
        self.bus.subscribe(kind, listener)
    }

    /// Unregisters a listener. Returns false if it was not registered for `kind`.
    pub fn remove_listener(&self, kind: EventKind, listener: &Arc<dyn Listener>) -> bool {
        self.bus.unsubscribe(kind, listener)
    }

    // ========== Adding trackers ==========

    /// Adds one tracker to a group, creating the group if needed.
    pub fn add_tracker(&self, group_id: &GroupId, tracker: Tracker, expiry: Expiry) -> Result<()> {
        let report = self.add_trackers(group_id, [tracker], expiry)?;
        match report.rejected.into_iter().next() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Adds several trackers. Invalid or duplicate trackers are rejected
    /// individually; the rest are added in one store write.
    pub fn add_trackers(
        &self,
        group_id: &GroupId,
        trackers: impl IntoIterator<Item = Tracker>,
        expiry: Expiry,
    ) -> Result<AddReport> {
        let now = Utc::now();
        let expire_at = expiry.resolve(now);
        let mut report = AddReport::default();
        let mut prepared = Vec::new();
        for mut tracker in trackers {
            match tracker.prepare(now, expire_at) {
                Ok(()) => prepared.push(tracker),
                Err(err) => report.rejected.push(err),
            }
        }

        let events = self.locks.scoped(group_id, || -> Result<Vec<TrackerEvent>> {
            let (mut group, mut events) = self.load_locked(group_id, now)?;
            let mut added = Vec::new();
            for tracker in prepared {
                let name = tracker.name().clone();
                match group.insert(tracker) {
                    Ok(()) => added.push(name),
                    Err(err) => report.rejected.push(err),
                }
            }
            if added.is_empty() {
                return Ok(events);
            }
            let fresh: Vec<&Tracker> = added.iter().filter_map(|name| group.get(name)).collect();
            self.store.save_trackers(group_id, &fresh)?;
            self.refresh_cache(&group)?;
            events.extend(
                fresh
                    .iter()
                    .map(|tracker| TrackerEvent::new(EventKind::Added, group_id, tracker)),
            );
            report.added = added;
            Ok(events)
        })?;

        tracing::debug!(
            %group_id,
            added = report.added.len(),
            rejected = report.rejected.len(),
            "added trackers"
        );
        self.dispatch(events);
        Ok(report)
    }

    // ========== Tracking ==========

    /// Evaluates every tracker of the group against `event`.
    pub fn track(&self, group_id: &GroupId, event: &Event) -> Result<Outcome> {
        self.track_at(group_id, event, Utc::now())
    }

    /// [`track`](Self::track) with an explicit evaluation time, which
    /// drives time-window limiters and tracker expiration.
    pub fn track_at(&self, group_id: &GroupId, event: &Event, now: DateTime<Utc>) -> Result<Outcome> {
        let mut contained = Vec::new();
        let evaluated = self.locks.scoped(group_id, || {
            self.evaluate_locked(group_id, event, now, &mut contained)
        });

        // Contained errors reach the hook even when persisting failed.
        for err in &contained {
            (self.error_hook)(err);
        }
        let (mut outcome, events) = evaluated?;
        outcome.errors = contained;
        outcome.errors.extend(self.dispatch(events));

        tracing::debug!(
            %group_id,
            dirtied = outcome.dirtied.len(),
            completed = outcome.completed.len(),
            limited = outcome.limited.len(),
            errors = outcome.errors.len(),
            "tracked event"
        );
        Ok(outcome)
    }

    fn evaluate_locked(
        &self,
        group_id: &GroupId,
        event: &Event,
        now: DateTime<Utc>,
        contained: &mut Vec<EvaluationError>,
    ) -> Result<(Outcome, Vec<TrackerEvent>)> {
        let (mut group, mut events) = self.load_locked(group_id, now)?;
        let mut outcome = Outcome::default();

        for tracker in group.trackers_mut() {
            if tracker.is_completed() {
                continue;
            }
            let before = tracker.clone();
            match tracker.evaluate(event, now, &self.extensions) {
                Ok(None) => {
                    tracing::trace!(%group_id, tracker = %tracker.name(), "event skipped");
                }
                Ok(Some(step)) => {
                    for stage in step.stages_completed {
                        events.push(TrackerEvent::stage_completed(group_id, tracker, stage));
                    }
                    if step.completed {
                        events.push(TrackerEvent::new(EventKind::AllCompleted, group_id, tracker));
                        outcome.completed.push(tracker.snapshot());
                    }
                    if step.newly_limited {
                        events.push(TrackerEvent::new(EventKind::Limited, group_id, tracker));
                        outcome.limited.push(tracker.snapshot());
                    }
                }
                Err((origin, err)) => {
                    *tracker = before;
                    contained.push(EvaluationError {
                        group_id: group_id.clone(),
                        tracker: tracker.name().clone(),
                        origin,
                        message: err.to_string(),
                    });
                }
            }
        }

        let dirty: Vec<&Tracker> = group.trackers().iter().filter(|t| t.is_dirty()).collect();
        if dirty.is_empty() {
            return Ok((outcome, events));
        }
        outcome.dirtied = dirty.iter().map(|t| t.snapshot()).collect();
        if let Err(err) = self.persist_locked(&mut group, &outcome.completed) {
            self.invalidate_cache(group_id);
            return Err(err);
        }
        Ok((outcome, events))
    }

    /// Writes dirty trackers to the store, drops completed ones when
    /// configured, then refreshes the cache.
    ///
    /// Callers invalidate the cache entry on failure: the store may
    /// already hold part of the call's writes.
    fn persist_locked(&self, group: &mut TrackerGroup, completed: &[Tracker]) -> Result<()> {
        let group_id = group.group_id().clone();
        let dirty: Vec<&Tracker> = group.trackers().iter().filter(|t| t.is_dirty()).collect();
        self.store.save_trackers(&group_id, &dirty)?;

        if self.config.remove_completed {
            for finished in completed {
                self.store.delete(&group_id, Some(finished.name()))?;
                group.remove(finished.name());
            }
        }
        group.mark_clean();
        self.refresh_cache(group)
    }

    // ========== Reading ==========

    /// Returns a snapshot of the group's live trackers, or only `name`.
    ///
    /// Served from the cache without locking. On a cache miss the group is
    /// loaded from the store under the group's scope and cached.
    pub fn get_trackers(&self, group_id: &GroupId, name: Option<&TrackerName>) -> Result<Vec<Tracker>> {
        let now = Utc::now();
        let group = match self.cache.get(group_id)? {
            Some(group) => group,
            None => {
                let (group, events) = self
                    .locks
                    .scoped(group_id, || self.load_locked(group_id, now))?;
                self.dispatch(events);
                group
            }
        };
        Ok(group
            .trackers()
            .iter()
            .filter(|t| !t.is_expired(now))
            .filter(|t| name.is_none_or(|name| t.name() == name))
            .map(Tracker::snapshot)
            .collect())
    }

    // ========== Removing and resetting ==========

    /// Removes one tracker, or every tracker of the group when `name` is `None`.
    pub fn remove_tracker(&self, group_id: &GroupId, name: Option<&TrackerName>) -> Result<Vec<Tracker>> {
        let now = Utc::now();
        let (removed, events) = self.locks.scoped(group_id, || -> Result<_> {
            let (mut group, events) = self.load_locked(group_id, now)?;
            let removed = match name {
                Some(name) => {
                    let tracker = group.remove(name).ok_or_else(|| Error::NotFound {
                        group_id: group_id.clone(),
                        name: Some(name.clone()),
                    })?;
                    self.store.delete(group_id, Some(name))?;
                    vec![tracker]
                }
                None => {
                    if group.is_empty() {
                        return Err(Error::NotFound {
                            group_id: group_id.clone(),
                            name: None,
                        });
                    }
                    self.store.delete(group_id, None)?;
                    group.drain()
                }
            };
            self.refresh_cache(&group)?;
            Ok((removed, events))
        })?;
        tracing::debug!(%group_id, removed = removed.len(), "removed trackers");
        self.dispatch(events);
        Ok(removed)
    }

    /// Rewinds a tracker's progress, limiters or both.
    pub fn reset_tracker(
        &self,
        group_id: &GroupId,
        name: &TrackerName,
        policy: ResetPolicy,
    ) -> Result<Tracker> {
        let now = Utc::now();
        let (tracker, mut events) = self.locks.scoped(group_id, || -> Result<_> {
            let (mut group, events) = self.load_locked(group_id, now)?;
            let tracker = group.get_mut(name).ok_or_else(|| Error::NotFound {
                group_id: group_id.clone(),
                name: Some(name.clone()),
            })?;
            tracker.reset(policy, now, &self.extensions);
            self.store.save_trackers(group_id, &[&*tracker])?;
            let snapshot = tracker.snapshot();
            group.mark_clean();
            self.refresh_cache(&group)?;
            Ok((snapshot, events))
        })?;
        tracing::debug!(%group_id, tracker = %name, %policy, "reset tracker");
        events.push(TrackerEvent::new(EventKind::Reset, group_id, &tracker));
        self.dispatch(events);
        Ok(tracker)
    }

    /// Deletes every group from the store and the cache. Not reversible.
    ///
    /// Fails with [`Error::ConfirmationRequired`] unless `confirm` is true.
    /// The cache is cleared first so a store failure cannot leave cached
    /// groups that the store no longer has.
    pub fn flush(&self, confirm: bool) -> Result<()> {
        if !confirm {
            return Err(Error::ConfirmationRequired);
        }
        self.cache.clear()?;
        self.store.clear()?;
        tracing::info!("flushed all tracker groups");
        Ok(())
    }

    // ========== Internals ==========

    /// Resolves the group: cache, then store (populating the cache), then
    /// empty. Expired trackers are pruned and reported. Caller holds the
    /// group's scope.
    fn load_locked(
        &self,
        group_id: &GroupId,
        now: DateTime<Utc>,
    ) -> Result<(TrackerGroup, Vec<TrackerEvent>)> {
        let (mut group, from_store) = match self.cache.get(group_id)? {
            Some(group) => (group, false),
            None => match self.store.load(group_id)? {
                Some(group) => (group, true),
                None => return Ok((TrackerGroup::new(group_id.clone()), Vec::new())),
            },
        };

        let expired = group.take_expired(now);
        if !expired.is_empty() {
            tracing::debug!(%group_id, expired = expired.len(), "pruning expired trackers");
            self.store.save(&group)?;
        }
        if from_store || !expired.is_empty() {
            self.refresh_cache(&group)?;
        }
        let events = expired
            .iter()
            .map(|tracker| TrackerEvent::new(EventKind::Expired, group_id, tracker))
            .collect();
        Ok((group, events))
    }

    /// Writes the group to the cache, or drops it if empty. On failure the
    /// entry is invalidated so the next read goes back to the store.
    fn refresh_cache(&self, group: &TrackerGroup) -> Result<()> {
        let written = if group.is_empty() {
            self.cache.delete(group.group_id())
        } else {
            self.cache.set(group, self.config.cache_ttl())
        };
        if let Err(err) = written {
            self.invalidate_cache(group.group_id());
            return Err(err.into());
        }
        Ok(())
    }

    /// Best-effort removal of a cache entry that may be stale.
    fn invalidate_cache(&self, group_id: &GroupId) {
        if let Err(cleanup) = self.cache.delete(group_id) {
            tracing::warn!(
                %group_id,
                error = %cleanup,
                "failed to invalidate cache entry after write failure"
            );
        }
    }

    /// Publishes events in order and reports listener failures to the hook.
    fn dispatch(&self, events: Vec<TrackerEvent>) -> Vec<EvaluationError> {
        let mut failures = Vec::new();
        for event in &events {
            for err in self.bus.publish(event) {
                (self.error_hook)(&err);
                failures.push(err);
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_resolves_to_earliest() {
        let now = Utc::now();
        let both = Expiry {
            expire: Some(Duration::seconds(60)),
            expire_at: Some(now + Duration::seconds(30)),
        };
        assert_eq!(both.resolve(now), Some(now + Duration::seconds(30)));
        assert_eq!(
            Expiry::after(Duration::seconds(10)).resolve(now),
            Some(now + Duration::seconds(10))
        );
        assert_eq!(Expiry::never().resolve(now), None);
    }

    #[test]
    fn config_defaults_remove_completed() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.remove_completed);
        assert_eq!(config.cache_ttl(), None);
    }
}
