//! Registry of user-defined conditions and limiters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::condition::CustomCondition;
use crate::limiter::CustomLimiter;

/// Named custom conditions and limiters available to trackers.
///
/// Trackers refer to extensions by name so their definitions stay
/// serialisable; the engine owns one registry, built before it starts.
#[derive(Default, Clone)]
pub struct Extensions {
    conditions: HashMap<String, Arc<dyn CustomCondition>>,
    limiters: HashMap<String, Arc<dyn CustomLimiter>>,
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut conditions: Vec<_> = self.conditions.keys().collect();
        let mut limiters: Vec<_> = self.limiters.keys().collect();
        conditions.sort();
        limiters.sort();
        f.debug_struct("Extensions")
            .field("conditions", &conditions)
            .field("limiters", &limiters)
            .finish()
    }
}

impl Extensions {
    /// Registers a condition, replacing any previous one with the same name.
    pub fn register_condition(
        &mut self,
        name: impl Into<String>,
        condition: impl CustomCondition + 'static,
    ) {
        self.conditions.insert(name.into(), Arc::new(condition));
    }

    /// Registers a limiter policy, replacing any previous one with the same name.
    pub fn register_limiter(&mut self, name: impl Into<String>, limiter: impl CustomLimiter + 'static) {
        self.limiters.insert(name.into(), Arc::new(limiter));
    }

    pub fn condition(&self, name: &str) -> Option<&dyn CustomCondition> {
        self.conditions.get(name).map(AsRef::as_ref)
    }

    pub fn limiter(&self, name: &str) -> Option<&dyn CustomLimiter> {
        self.limiters.get(name).map(AsRef::as_ref)
    }
}
