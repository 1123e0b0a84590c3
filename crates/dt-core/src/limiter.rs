//! Stateful gates that throttle tracker progress.
//!
//! A limiter is consulted twice per applied event: `pre` before progress
//! is folded in and `post` afterwards. Either hook returning `false`
//! latches the limiter into the limited state, after which every `pre`
//! rejects until [`Limiter::reset`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtensionError;
use crate::event::Event;
use crate::extension::Extensions;

/// A user-defined limiter policy, registered on the engine under a name.
///
/// The policy itself is stateless; per-tracker state lives in the
/// limiter's `state` value and is persisted with the tracker.
pub trait CustomLimiter: Send + Sync {
    /// Returns whether progress may be applied.
    fn pre(&self, state: &Value, event: &Event, now: DateTime<Utc>)
    -> Result<bool, ExtensionError>;

    /// Records one applied event. Returns `false` once the budget is spent.
    fn post(
        &self,
        state: &mut Value,
        event: &Event,
        now: DateTime<Utc>,
    ) -> Result<bool, ExtensionError>;

    /// Restores fresh state.
    fn reset(&self, state: &mut Value, now: DateTime<Utc>);
}

/// The policy a limiter enforces, with its own counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LimitPolicy {
    /// Allows `capacity` applied events in total.
    Count {
        capacity: u64,
        #[serde(default)]
        used: u64,
    },
    /// Allows any number of applied events until `seconds` after the window start.
    Window {
        seconds: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
    },
    /// Delegates to a [`CustomLimiter`] registered under `name`.
    Custom {
        name: String,
        #[serde(default)]
        state: Value,
    },
}

/// A limiter attached to a tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limiter {
    #[serde(flatten)]
    policy: LimitPolicy,
    #[serde(default)]
    limited: bool,
}

impl Limiter {
    pub const fn new(policy: LimitPolicy) -> Self {
        Self {
            policy,
            limited: false,
        }
    }

    /// Permits exactly `capacity` applied events.
    pub const fn count(capacity: u64) -> Self {
        Self::new(LimitPolicy::Count { capacity, used: 0 })
    }

    /// Permits applied events until `window` has elapsed since the tracker was added.
    pub fn window(window: Duration) -> Self {
        Self::new(LimitPolicy::Window {
            seconds: window.num_seconds(),
            started_at: None,
        })
    }

    /// References a registered custom limiter, starting from `state`.
    pub fn custom(name: impl Into<String>, state: Value) -> Self {
        Self::new(LimitPolicy::Custom {
            name: name.into(),
            state,
        })
    }

    pub const fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    pub const fn is_limited(&self) -> bool {
        self.limited
    }

    /// Reason the parameters are unusable, if they are.
    pub(crate) const fn invalid_reason(&self) -> Option<&'static str> {
        match &self.policy {
            LimitPolicy::Count { capacity: 0, .. } => Some("count capacity must be positive"),
            LimitPolicy::Window { seconds, .. } if *seconds <= 0 => {
                Some("time window must be positive")
            }
            _ => None,
        }
    }

    /// Starts the time window if it has not started yet.
    pub(crate) fn arm(&mut self, now: DateTime<Utc>) {
        if let LimitPolicy::Window { started_at, .. } = &mut self.policy {
            started_at.get_or_insert(now);
        }
    }

    /// Checks whether progress may be applied. Latches on rejection.
    pub fn pre(
        &mut self,
        event: &Event,
        now: DateTime<Utc>,
        extensions: &Extensions,
    ) -> Result<bool, ExtensionError> {
        if self.limited {
            return Ok(false);
        }
        self.arm(now);
        let allowed = match &self.policy {
            LimitPolicy::Count { capacity, used } => used < capacity,
            LimitPolicy::Window {
                seconds,
                started_at,
            } => before_deadline(*seconds, *started_at, now),
            LimitPolicy::Custom { name, state } => {
                custom(extensions, name)?.pre(state, event, now)?
            }
        };
        if !allowed {
            self.limited = true;
        }
        Ok(allowed)
    }

    /// Records an applied event. Returns `false` if this call latched the limiter.
    pub fn post(
        &mut self,
        event: &Event,
        now: DateTime<Utc>,
        extensions: &Extensions,
    ) -> Result<bool, ExtensionError> {
        let allowed = match &mut self.policy {
            LimitPolicy::Count { capacity, used } => {
                *used += 1;
                *used < *capacity
            }
            LimitPolicy::Window {
                seconds,
                started_at,
            } => before_deadline(*seconds, *started_at, now),
            LimitPolicy::Custom { name, state } => {
                custom(extensions, name)?.post(state, event, now)?
            }
        };
        if !allowed {
            self.limited = true;
        }
        Ok(allowed)
    }

    /// Clears the limited flag and restores fresh counters.
    ///
    /// A time window restarts at `now`. A custom limiter whose policy is no
    /// longer registered has its state cleared to `null`.
    pub fn reset(&mut self, now: DateTime<Utc>, extensions: &Extensions) {
        self.limited = false;
        match &mut self.policy {
            LimitPolicy::Count { used, .. } => *used = 0,
            LimitPolicy::Window { started_at, .. } => *started_at = Some(now),
            LimitPolicy::Custom { name, state } => match extensions.limiter(name) {
                Some(limiter) => limiter.reset(state, now),
                None => *state = Value::Null,
            },
        }
    }
}

fn before_deadline(seconds: i64, started_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    started_at.is_none_or(|start| now < start + Duration::seconds(seconds))
}

fn custom<'a>(extensions: &'a Extensions, name: &str) -> Result<&'a dyn CustomLimiter, String> {
    extensions
        .limiter(name)
        .ok_or_else(|| format!("no custom limiter registered as {name:?}"))
}
