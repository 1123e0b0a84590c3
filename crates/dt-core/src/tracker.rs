//! Trackers: staged progress toward ordered targets.
//!
//! A tracker is ACTIVE at some stage until its final target is met, when
//! it becomes COMPLETED (terminal until reset). LIMITED is an orthogonal
//! flag owned by the tracker's limiters.
//!
//! Stage crossing cascades: one event that jumps past several thresholds
//! completes each of them in order within the same call.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::{self, Condition};
use crate::error::{ConfigError, ExtensionError, FailureOrigin};
use crate::event::Event;
use crate::extension::Extensions;
use crate::limiter::Limiter;
use crate::types::TrackerName;

/// How an event is folded into progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrackerKind {
    /// Each applied event adds one.
    Count,
    /// Progress is the last value read from `key`.
    Numeric { key: String },
    /// Progress is the running sum of `key`.
    Accumulation { key: String },
}

/// What `reset_tracker` rewinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetPolicy {
    /// Stage and progress back to the start; limiters untouched.
    Progress,
    /// Limiters only.
    Limiter,
    /// Both.
    All,
}

impl ResetPolicy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Progress => "progress",
            Self::Limiter => "limiter",
            Self::All => "all",
        }
    }

    const fn resets_progress(self) -> bool {
        matches!(self, Self::Progress | Self::All)
    }

    const fn resets_limiters(self) -> bool {
        matches!(self, Self::Limiter | Self::All)
    }
}

impl fmt::Display for ResetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "progress" => Ok(Self::Progress),
            "limiter" => Ok(Self::Limiter),
            "all" => Ok(Self::All),
            _ => Err(format!("invalid reset policy: {s}")),
        }
    }
}

/// Transitions produced by folding one event into a tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Step {
    /// Non-final stages completed by this event, in order.
    pub stages_completed: Vec<usize>,
    /// The final target was met.
    pub completed: bool,
    /// A limiter latched during this call.
    pub newly_limited: bool,
}

/// A named progress counter with targets, conditions and limiters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    name: TrackerName,
    #[serde(flatten)]
    kind: TrackerKind,
    targets: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    limiters: Vec<Limiter>,
    #[serde(default)]
    stage: usize,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expire_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    dirty: bool,
}

impl Tracker {
    pub fn new(name: TrackerName, kind: TrackerKind, targets: impl Into<Vec<f64>>) -> Self {
        Self {
            name,
            kind,
            targets: targets.into(),
            conditions: Vec::new(),
            limiters: Vec::new(),
            stage: 0,
            progress: 0.0,
            completed: false,
            created_at: None,
            expire_at: None,
            dirty: false,
        }
    }

    /// Counts matching events.
    pub fn count(name: TrackerName, targets: impl Into<Vec<f64>>) -> Self {
        Self::new(name, TrackerKind::Count, targets)
    }

    /// Tracks the latest value of a numeric field.
    pub fn numeric(name: TrackerName, key: impl Into<String>, targets: impl Into<Vec<f64>>) -> Self {
        Self::new(name, TrackerKind::Numeric { key: key.into() }, targets)
    }

    /// Sums a numeric field across matching events.
    pub fn accumulation(
        name: TrackerName,
        key: impl Into<String>,
        targets: impl Into<Vec<f64>>,
    ) -> Self {
        Self::new(name, TrackerKind::Accumulation { key: key.into() }, targets)
    }

    #[must_use]
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    #[must_use]
    pub fn with_conditions(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.conditions.extend(conditions);
        self
    }

    #[must_use]
    pub fn with_limiter(mut self, limiter: Limiter) -> Self {
        self.limiters.push(limiter);
        self
    }

    pub const fn name(&self) -> &TrackerName {
        &self.name
    }

    pub const fn kind(&self) -> &TrackerKind {
        &self.kind
    }

    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    /// The target the tracker is currently progressing toward. `None` only
    /// for a definition without targets, which `validate` rejects.
    pub fn target(&self) -> Option<f64> {
        self.targets.get(self.stage).copied()
    }

    pub const fn stage(&self) -> usize {
        self.stage
    }

    pub const fn progress(&self) -> f64 {
        self.progress
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn limiters(&self) -> &[Limiter] {
        &self.limiters
    }

    pub const fn is_completed(&self) -> bool {
        self.completed
    }

    /// True if any limiter has latched.
    pub fn is_limited(&self) -> bool {
        self.limiters.iter().any(Limiter::is_limited)
    }

    /// Changed since it was last persisted.
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub const fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub const fn expire_at(&self) -> Option<DateTime<Utc>> {
        self.expire_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_at.is_some_and(|at| at <= now)
    }

    /// Checks the definition: at least one target, all finite, positive
    /// and strictly increasing, and usable limiter parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::NoTargets {
                name: self.name.clone(),
            });
        }
        let mut previous = 0.0;
        for (stage, &value) in self.targets.iter().enumerate() {
            if !value.is_finite() || value <= previous {
                return Err(ConfigError::InvalidTarget {
                    name: self.name.clone(),
                    stage,
                    value,
                });
            }
            previous = value;
        }
        if let Some(reason) = self.limiters.iter().find_map(Limiter::invalid_reason) {
            return Err(ConfigError::InvalidLimiter {
                name: self.name.clone(),
                reason,
            });
        }
        if self.stage >= self.targets.len() {
            return Err(ConfigError::InvalidTarget {
                name: self.name.clone(),
                stage: self.stage,
                value: f64::NAN,
            });
        }
        Ok(())
    }

    /// Stamps creation time and expiration, and starts limiter windows.
    pub(crate) fn prepare(
        &mut self,
        now: DateTime<Utc>,
        expire_at: Option<DateTime<Utc>>,
    ) -> Result<(), ConfigError> {
        self.validate()?;
        let expire_at = match (self.expire_at, expire_at) {
            (Some(existing), Some(requested)) => Some(existing.min(requested)),
            (existing, requested) => existing.or(requested),
        };
        if let Some(at) = expire_at.filter(|at| *at <= now) {
            return Err(ConfigError::AlreadyExpired {
                name: self.name.clone(),
                expire_at: at,
            });
        }
        self.expire_at = expire_at;
        self.created_at.get_or_insert(now);
        for limiter in &mut self.limiters {
            limiter.arm(now);
        }
        self.dirty = false;
        Ok(())
    }

    /// Folds one event into the tracker.
    ///
    /// Returns `None` when the event does not apply: the tracker is
    /// complete, a condition failed, or the progress field is missing.
    /// On error the tracker may be partially updated; callers restore a
    /// snapshot.
    pub(crate) fn evaluate(
        &mut self,
        event: &Event,
        now: DateTime<Utc>,
        extensions: &Extensions,
    ) -> Result<Option<Step>, (FailureOrigin, ExtensionError)> {
        if self.completed {
            return Ok(None);
        }
        let passed = condition::all_pass(&self.conditions, event, extensions)
            .map_err(|err| (FailureOrigin::Condition, err))?;
        if !passed {
            return Ok(None);
        }
        let value = match &self.kind {
            TrackerKind::Count => Some(1.0),
            TrackerKind::Numeric { key } | TrackerKind::Accumulation { key } => {
                event.number(key)
            }
        };
        let Some(value) = value else {
            tracing::trace!(tracker = %self.name, "event has no numeric progress field");
            return Ok(None);
        };

        let was_limited = self.is_limited();
        let before = (self.progress, self.stage, self.completed, self.limiters.clone());
        let mut step = Step::default();

        let mut allowed = true;
        for limiter in &mut self.limiters {
            let passed = limiter
                .pre(event, now, extensions)
                .map_err(|err| (FailureOrigin::Limiter, err))?;
            allowed &= passed;
        }

        if allowed {
            match self.kind {
                TrackerKind::Numeric { .. } => self.progress = value,
                TrackerKind::Count | TrackerKind::Accumulation { .. } => self.progress += value,
            }
            self.advance(&mut step);
            for limiter in &mut self.limiters {
                limiter
                    .post(event, now, extensions)
                    .map_err(|err| (FailureOrigin::Limiter, err))?;
            }
        }

        step.newly_limited = !was_limited && self.is_limited();
        let after = (self.progress, self.stage, self.completed, &self.limiters);
        if (before.0, before.1, before.2, &before.3) != after {
            self.dirty = true;
        }
        Ok(Some(step))
    }

    fn advance(&mut self, step: &mut Step) {
        while !self.completed && self.progress >= self.targets[self.stage] {
            if self.stage + 1 == self.targets.len() {
                self.completed = true;
                step.completed = true;
            } else {
                step.stages_completed.push(self.stage);
                self.stage += 1;
            }
        }
    }

    /// Rewinds progress, limiters, or both.
    pub fn reset(&mut self, policy: ResetPolicy, now: DateTime<Utc>, extensions: &Extensions) {
        if policy.resets_progress() {
            self.stage = 0;
            self.progress = 0.0;
            self.completed = false;
        }
        if policy.resets_limiters() {
            for limiter in &mut self.limiters {
                limiter.reset(now, extensions);
            }
        }
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// A detached copy for callers and listeners.
    pub fn snapshot(&self) -> Self {
        let mut copy = self.clone();
        copy.dirty = false;
        copy
    }
}
