//! Error taxonomy for the tracking engine.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::bus::EventKind;
use crate::types::{GroupId, TrackerName};

/// Boxed error returned by user-supplied conditions, limiters and listeners.
pub type ExtensionError = Box<dyn std::error::Error + Send + Sync>;

/// Invalid tracker definition. Reported before any state is mutated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// The target sequence was empty.
    #[error("tracker {name} must have at least one target")]
    NoTargets { name: TrackerName },

    /// A target was not finite, not positive, or not above the previous one.
    #[error(
        "tracker {name} has invalid target {value} at stage {stage}: \
         targets must be finite, positive and strictly increasing"
    )]
    InvalidTarget {
        name: TrackerName,
        stage: usize,
        value: f64,
    },

    /// A tracker with the same name already exists in the group.
    #[error("tracker {name} already exists in group {group_id}")]
    DuplicateName { group_id: GroupId, name: TrackerName },

    /// A limiter was configured with unusable parameters.
    #[error("tracker {name} has an invalid limiter: {reason}")]
    InvalidLimiter {
        name: TrackerName,
        reason: &'static str,
    },

    /// The resolved expiration is not in the future.
    #[error("tracker {name} would expire at {expire_at}, which is not in the future")]
    AlreadyExpired {
        name: TrackerName,
        expire_at: DateTime<Utc>,
    },
}

/// What went wrong inside a cache or store call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Connection, I/O or other backend failure.
    Unavailable,
    /// The backend did not answer in time.
    Timeout,
    /// A persisted document could not be encoded or decoded.
    Serialization,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unavailable => "unavailable",
            Self::Timeout => "timed out",
            Self::Serialization => "serialization failed",
        };
        f.write_str(s)
    }
}

/// A cache or store call failed. The engine never retries these.
#[derive(Debug, Error)]
#[error("{backend} backend {kind}: {source}")]
pub struct BackendError {
    backend: &'static str,
    kind: BackendErrorKind,
    #[source]
    source: ExtensionError,
}

impl BackendError {
    pub fn new(
        backend: &'static str,
        kind: BackendErrorKind,
        source: impl Into<ExtensionError>,
    ) -> Self {
        Self {
            backend,
            kind,
            source: source.into(),
        }
    }

    pub fn unavailable(backend: &'static str, source: impl Into<ExtensionError>) -> Self {
        Self::new(backend, BackendErrorKind::Unavailable, source)
    }

    pub fn timeout(backend: &'static str, source: impl Into<ExtensionError>) -> Self {
        Self::new(backend, BackendErrorKind::Timeout, source)
    }

    pub fn serialization(backend: &'static str, source: impl Into<ExtensionError>) -> Self {
        Self::new(backend, BackendErrorKind::Serialization, source)
    }

    /// Name of the backend that failed (e.g. `"sqlite store"`).
    pub const fn backend(&self) -> &'static str {
        self.backend
    }

    pub const fn kind(&self) -> BackendErrorKind {
        self.kind
    }
}

/// Errors that abort an engine operation.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    /// `flush` was called without confirmation.
    #[error("flush is destructive and requires explicit confirmation")]
    ConfirmationRequired,

    /// The group, or the named tracker within it, does not exist.
    #[error("{}", describe_missing(group_id, name.as_ref()))]
    NotFound {
        group_id: GroupId,
        name: Option<TrackerName>,
    },
}

fn describe_missing(group_id: &GroupId, name: Option<&TrackerName>) -> String {
    match name {
        Some(name) => format!("tracker {name} not found in group {group_id}"),
        None => format!("group {group_id} not found"),
    }
}

/// Which extension point raised an [`EvaluationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOrigin {
    Condition,
    Limiter,
    Listener(EventKind),
}

impl fmt::Display for FailureOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Condition => f.write_str("condition"),
            Self::Limiter => f.write_str("limiter"),
            Self::Listener(kind) => write!(f, "{kind} listener"),
        }
    }
}

/// A user-supplied condition, limiter or listener failed.
///
/// Contained to one tracker (or one listener call); the rest of the
/// `track` call proceeds and the error is handed to the error hook.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{origin} failed for tracker {tracker} in group {group_id}: {message}")]
pub struct EvaluationError {
    pub group_id: GroupId,
    pub tracker: TrackerName,
    pub origin: FailureOrigin,
    pub message: String,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
