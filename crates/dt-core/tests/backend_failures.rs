//! Behaviour when the cache or store fails mid-operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dt_core::{
    BackendError, BackendErrorKind, Cache, Condition, Engine, Error, Event, ExtensionError,
    Expiry, GroupId, MemoryCache, MemoryStore, Store, Tracker, TrackerGroup, TrackerName,
};
use serde_json::{Value, json};

/// Store whose writes fail while `failing` is set. `failing_delete` only
/// fails deletes.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
    failing_delete: AtomicBool,
}

impl FlakyStore {
    fn check(&self) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::timeout("flaky store", "write timed out"));
        }
        Ok(())
    }
}

impl Store for FlakyStore {
    fn load(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError> {
        self.inner.load(group_id)
    }

    fn save(&self, group: &TrackerGroup) -> Result<(), BackendError> {
        self.check()?;
        self.inner.save(group)
    }

    fn save_trackers(&self, group_id: &GroupId, trackers: &[&Tracker]) -> Result<(), BackendError> {
        self.check()?;
        self.inner.save_trackers(group_id, trackers)
    }

    fn delete(&self, group_id: &GroupId, name: Option<&TrackerName>) -> Result<(), BackendError> {
        self.check()?;
        if self.failing_delete.load(Ordering::SeqCst) {
            return Err(BackendError::timeout("flaky store", "delete timed out"));
        }
        self.inner.delete(group_id, name)
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.check()?;
        self.inner.clear()
    }
}

/// Cache whose `set` fails while `failing` is set.
#[derive(Default)]
struct FlakyCache {
    inner: MemoryCache,
    failing: AtomicBool,
}

impl Cache for FlakyCache {
    fn get(&self, group_id: &GroupId) -> Result<Option<TrackerGroup>, BackendError> {
        self.inner.get(group_id)
    }

    fn set(&self, group: &TrackerGroup, ttl: Option<Duration>) -> Result<(), BackendError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::unavailable("flaky cache", "connection refused"));
        }
        self.inner.set(group, ttl)
    }

    fn delete(&self, group_id: &GroupId) -> Result<(), BackendError> {
        self.inner.delete(group_id)
    }

    fn exists(&self, group_id: &GroupId) -> Result<bool, BackendError> {
        self.inner.exists(group_id)
    }

    fn clear(&self) -> Result<(), BackendError> {
        self.inner.clear()
    }
}

fn gid() -> GroupId {
    GroupId::new("g").unwrap()
}

fn tick() -> Event {
    Event::try_from(json!({})).unwrap()
}

#[test]
fn test_store_failure_surfaces_and_leaves_state_untouched() {
    let store = Arc::new(FlakyStore::default());
    let engine = Engine::new(MemoryCache::new(), Arc::clone(&store));
    engine
        .add_tracker(
            &gid(),
            Tracker::count(TrackerName::new("t").unwrap(), [5.0]),
            Expiry::never(),
        )
        .unwrap();

    store.failing.store(true, Ordering::SeqCst);
    let backend = match engine.track(&gid(), &tick()).unwrap_err() {
        Error::Backend(backend) => backend,
        other => panic!("expected backend error, got {other:?}"),
    };
    assert_eq!(backend.kind(), BackendErrorKind::Timeout);

    // Neither the cache nor the store saw the failed increment.
    assert_eq!(engine.get_trackers(&gid(), None).unwrap()[0].progress(), 0.0);
    assert_eq!(
        store.load(&gid()).unwrap().unwrap().trackers()[0].progress(),
        0.0
    );

    // The lock was released: the next call goes through.
    store.failing.store(false, Ordering::SeqCst);
    let outcome = engine.track(&gid(), &tick()).unwrap();
    assert_eq!(outcome.dirtied[0].progress(), 1.0);
}

#[test]
fn test_cache_failure_after_store_write_is_repaired_on_next_read() {
    let cache = Arc::new(FlakyCache::default());
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(Arc::clone(&cache), Arc::clone(&store));
    engine
        .add_tracker(
            &gid(),
            Tracker::count(TrackerName::new("t").unwrap(), [5.0]),
            Expiry::never(),
        )
        .unwrap();

    cache.failing.store(true, Ordering::SeqCst);
    let err = engine.track(&gid(), &tick()).unwrap_err();
    assert!(matches!(err, Error::Backend(ref e) if e.kind() == BackendErrorKind::Unavailable));

    // The stale entry was invalidated, so reads fall back to the store.
    assert!(!cache.exists(&gid()).unwrap());
    cache.failing.store(false, Ordering::SeqCst);
    assert_eq!(engine.get_trackers(&gid(), None).unwrap()[0].progress(), 1.0);
    assert!(cache.exists(&gid()).unwrap());
}

#[test]
fn test_flush_clears_cache_before_store() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(FlakyStore::default());
    let engine = Engine::new(Arc::clone(&cache), Arc::clone(&store));
    engine
        .add_tracker(
            &gid(),
            Tracker::count(TrackerName::new("t").unwrap(), [5.0]),
            Expiry::never(),
        )
        .unwrap();

    store.failing.store(true, Ordering::SeqCst);
    assert!(engine.flush(true).is_err());
    assert!(cache.is_empty());
    assert!(!store.inner.is_empty());
}

#[test]
fn test_failed_completion_removal_does_not_leave_stale_cache() {
    let cache = Arc::new(MemoryCache::new());
    let store = Arc::new(FlakyStore::default());
    let engine = Engine::new(Arc::clone(&cache), Arc::clone(&store));
    engine
        .add_tracker(
            &gid(),
            Tracker::count(TrackerName::new("t").unwrap(), [2.0]),
            Expiry::never(),
        )
        .unwrap();
    engine.track(&gid(), &tick()).unwrap();

    // The completed state is saved, then removing the tracker fails.
    store.failing_delete.store(true, Ordering::SeqCst);
    let err = engine.track(&gid(), &tick()).unwrap_err();
    assert!(matches!(err, Error::Backend(ref e) if e.kind() == BackendErrorKind::Timeout));
    assert!(!cache.exists(&gid()).unwrap());

    // Reads agree with the store and the tracker does not complete twice.
    let stored = store.load(&gid()).unwrap().unwrap();
    assert_eq!(stored.trackers()[0].progress(), 2.0);
    assert!(stored.trackers()[0].is_completed());
    let read = engine.get_trackers(&gid(), None).unwrap();
    assert_eq!(read[0].progress(), 2.0);
    assert!(read[0].is_completed());

    store.failing_delete.store(false, Ordering::SeqCst);
    let outcome = engine.track(&gid(), &tick()).unwrap();
    assert!(outcome.completed.is_empty());
    assert!(outcome.dirtied.is_empty());
}

#[test]
fn test_contained_errors_reach_hook_when_persisting_fails() {
    let hooked = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&hooked);
    let store = Arc::new(FlakyStore::default());
    let engine = Engine::builder(MemoryCache::new(), Arc::clone(&store))
        .condition(
            "explode",
            |_: &Event, _: &Value| -> Result<bool, ExtensionError> { Err("boom".into()) },
        )
        .error_hook(move |err| sink.lock().unwrap().push(err.tracker.clone()))
        .build();
    engine
        .add_tracker(
            &gid(),
            Tracker::count(TrackerName::new("fragile").unwrap(), [5.0])
                .with_condition(Condition::custom("explode", json!(null))),
            Expiry::never(),
        )
        .unwrap();
    engine
        .add_tracker(
            &gid(),
            Tracker::count(TrackerName::new("plain").unwrap(), [5.0]),
            Expiry::never(),
        )
        .unwrap();

    store.failing.store(true, Ordering::SeqCst);
    assert!(engine.track(&gid(), &tick()).is_err());
    assert_eq!(*hooked.lock().unwrap(), [TrackerName::new("fragile").unwrap()]);
}
