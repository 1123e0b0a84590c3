//! Core of the tracking engine.
//!
//! This crate contains:
//! - Events, conditions and limiters: what an event must look like and
//!   how often it may count
//! - Trackers: staged progress toward one or more targets
//! - The event bus for lifecycle notifications
//! - Cache and store contracts, with in-process implementations
//! - [`Engine`]: per-group atomic evaluation with write-through persistence

mod bus;
pub mod cache;
pub mod condition;
mod engine;
pub mod error;
pub mod event;
mod extension;
pub mod group;
pub mod limiter;
mod locks;
pub mod store;
pub mod tracker;
pub mod types;

pub use bus::{EventKind, Listener, TrackerEvent};
pub use cache::{Cache, MemoryCache};
pub use condition::{Condition, CustomCondition};
pub use engine::{AddReport, Engine, EngineBuilder, EngineConfig, ErrorHook, Expiry, Outcome};
pub use error::{
    BackendError, BackendErrorKind, ConfigError, Error, EvaluationError, ExtensionError,
    FailureOrigin, Result,
};
pub use event::Event;
pub use extension::Extensions;
pub use group::TrackerGroup;
pub use limiter::{CustomLimiter, LimitPolicy, Limiter};
pub use store::{MemoryStore, Store};
pub use tracker::{ResetPolicy, Tracker, TrackerKind};
pub use types::{GroupId, TrackerName, ValidationError};
