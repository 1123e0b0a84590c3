//! Synchronous, in-process lifecycle notifications.
//!
//! Listeners run on the caller's thread, in registration order within an
//! event kind. A failing listener does not stop the others.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{EvaluationError, ExtensionError, FailureOrigin};
use crate::tracker::Tracker;
use crate::types::GroupId;

/// Lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Added,
    StageCompleted,
    AllCompleted,
    Reset,
    Limited,
    Expired,
}

impl EventKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::StageCompleted => "stage_completed",
            Self::AllCompleted => "all_completed",
            Self::Reset => "reset",
            Self::Limited => "limited",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle notification.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerEvent {
    pub kind: EventKind,
    pub group_id: GroupId,
    /// The stage this event refers to. For `StageCompleted` it is the
    /// stage that was just completed, which may be behind `tracker.stage()`
    /// when one event crossed several thresholds.
    pub stage: usize,
    /// The tracker's state after the transition.
    pub tracker: Tracker,
}

impl TrackerEvent {
    pub(crate) fn new(kind: EventKind, group_id: &GroupId, tracker: &Tracker) -> Self {
        Self {
            kind,
            group_id: group_id.clone(),
            stage: tracker.stage(),
            tracker: tracker.snapshot(),
        }
    }

    pub(crate) fn stage_completed(group_id: &GroupId, tracker: &Tracker, stage: usize) -> Self {
        Self {
            stage,
            ..Self::new(EventKind::StageCompleted, group_id, tracker)
        }
    }
}

/// Observer of lifecycle events.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &TrackerEvent) -> Result<(), ExtensionError>;
}

impl<F> Listener for F
where
    F: Fn(&TrackerEvent) -> Result<(), ExtensionError> + Send + Sync,
{
    fn on_event(&self, event: &TrackerEvent) -> Result<(), ExtensionError> {
        self(event)
    }
}

type Registration = (EventKind, Arc<dyn Listener>);

/// Listener table owned by one engine.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Registration>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("EventBus")
            .field("listeners", &listeners.len())
            .finish()
    }
}

fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

impl EventBus {
    /// Registers `listener` for `kind`. Returns false if it was already registered.
    pub fn subscribe(&self, kind: EventKind, listener: Arc<dyn Listener>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if listeners
            .iter()
            .any(|(k, l)| *k == kind && same_listener(l, &listener))
        {
            return false;
        }
        listeners.push((kind, listener));
        true
    }

    /// Unregisters `listener` from `kind`. Returns false if it was not registered.
    pub fn unsubscribe(&self, kind: EventKind, listener: &Arc<dyn Listener>) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(k, l)| !(*k == kind && same_listener(l, listener)));
        listeners.len() != before
    }

    /// Runs every listener for the event's kind and collects their failures.
    ///
    /// The table is not locked while listeners run, so a listener may
    /// subscribe or unsubscribe others.
    pub fn publish(&self, event: &TrackerEvent) -> Vec<EvaluationError> {
        let targets: Vec<Arc<dyn Listener>> = {
            let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
            listeners
                .iter()
                .filter(|(kind, _)| *kind == event.kind)
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        targets
            .iter()
            .filter_map(|listener| listener.on_event(event).err())
            .map(|err| EvaluationError {
                group_id: event.group_id.clone(),
                tracker: event.tracker.name().clone(),
                origin: FailureOrigin::Listener(event.kind),
                message: err.to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::types::TrackerName;

    fn sample(kind: EventKind) -> TrackerEvent {
        let tracker = Tracker::count(TrackerName::new("t").unwrap(), [1.0]);
        TrackerEvent::new(kind, &GroupId::new("g").unwrap(), &tracker)
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> Arc<dyn Listener> {
        let log = Arc::clone(log);
        Arc::new(move |event: &TrackerEvent| -> Result<(), ExtensionError> {
            log.lock().unwrap().push(format!("{tag}:{}", event.kind));
            Ok(())
        })
    }

    #[test]
    fn listeners_run_in_registration_order_per_kind() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::Added, recorder(&log, "first"));
        bus.subscribe(EventKind::Added, recorder(&log, "second"));
        bus.subscribe(EventKind::Reset, recorder(&log, "other"));

        assert!(bus.publish(&sample(EventKind::Added)).is_empty());
        assert_eq!(*log.lock().unwrap(), ["first:added", "second:added"]);
    }

    #[test]
    fn registration_is_idempotent() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = recorder(&log, "only");

        assert!(bus.subscribe(EventKind::Limited, Arc::clone(&listener)));
        assert!(!bus.subscribe(EventKind::Limited, Arc::clone(&listener)));
        bus.publish(&sample(EventKind::Limited));
        assert_eq!(log.lock().unwrap().len(), 1);

        assert!(bus.unsubscribe(EventKind::Limited, &listener));
        assert!(!bus.unsubscribe(EventKind::Limited, &listener));
        bus.publish(&sample(EventKind::Limited));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn failing_listener_does_not_stop_others() {
        let bus = EventBus::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing: Arc<dyn Listener> =
            Arc::new(|_: &TrackerEvent| -> Result<(), ExtensionError> { Err("boom".into()) });
        bus.subscribe(EventKind::AllCompleted, failing);
        bus.subscribe(EventKind::AllCompleted, recorder(&log, "after"));

        let errors = bus.publish(&sample(EventKind::AllCompleted));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].origin, FailureOrigin::Listener(EventKind::AllCompleted));
        assert_eq!(errors[0].message, "boom");
        assert_eq!(*log.lock().unwrap(), ["after:all_completed"]);
    }
}
