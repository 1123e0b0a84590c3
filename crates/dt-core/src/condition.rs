//! Stateless predicates that gate whether an event affects a tracker.
//!
//! All conditions attached to a tracker are AND-combined; an empty set
//! always passes. Value conditions fail when their key is absent,
//! including the negated ones. Only [`Condition::KeyNotExists`] passes
//! on absence.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtensionError;
use crate::event::Event;
use crate::extension::Extensions;

/// A user-defined predicate, registered on the engine under a name.
pub trait CustomCondition: Send + Sync {
    /// Returns whether `event` passes, given the tracker's `params`.
    fn check(&self, event: &Event, params: &Value) -> Result<bool, ExtensionError>;
}

impl<F> CustomCondition for F
where
    F: Fn(&Event, &Value) -> Result<bool, ExtensionError> + Send + Sync,
{
    fn check(&self, event: &Event, params: &Value) -> Result<bool, ExtensionError> {
        self(event, params)
    }
}

const fn case_sensitive_default() -> bool {
    true
}

/// Built-in predicates plus a named hook for custom ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    KeyExists {
        key: String,
    },
    KeyNotExists {
        key: String,
    },
    Eq {
        key: String,
        value: Value,
    },
    Ne {
        key: String,
        value: Value,
    },
    Gt {
        key: String,
        value: Value,
    },
    Ge {
        key: String,
        value: Value,
    },
    Lt {
        key: String,
        value: Value,
    },
    Le {
        key: String,
        value: Value,
    },
    /// The event's string field contains `value` as a substring.
    Contains {
        key: String,
        value: String,
        #[serde(default = "case_sensitive_default")]
        case_sensitive: bool,
    },
    NotContains {
        key: String,
        value: String,
        #[serde(default = "case_sensitive_default")]
        case_sensitive: bool,
    },
    /// The event's field equals one of `values`.
    In {
        key: String,
        values: Vec<Value>,
    },
    NotIn {
        key: String,
        values: Vec<Value>,
    },
    /// The event's list field shares at least one item with `values`.
    Intersects {
        key: String,
        values: Vec<Value>,
    },
    NotIntersects {
        key: String,
        values: Vec<Value>,
    },
    /// The event's list field contains `value`.
    ListContains {
        key: String,
        value: Value,
    },
    ListNotContains {
        key: String,
        value: Value,
    },
    /// Delegates to a [`CustomCondition`] registered under `name`.
    Custom {
        name: String,
        #[serde(default)]
        params: Value,
    },
}

impl Condition {
    /// References a registered custom condition.
    pub fn custom(name: impl Into<String>, params: Value) -> Self {
        Self::Custom {
            name: name.into(),
            params,
        }
    }

    /// Evaluates the predicate against one event.
    ///
    /// Only custom conditions can fail; built-ins are total.
    pub fn check(&self, event: &Event, extensions: &Extensions) -> Result<bool, ExtensionError> {
        let passed = match self {
            Self::KeyExists { key } => event.contains(key),
            Self::KeyNotExists { key } => !event.contains(key),
            Self::Eq { key, value } => event.get(key).is_some_and(|v| loose_eq(v, value)),
            Self::Ne { key, value } => event.get(key).is_some_and(|v| !loose_eq(v, value)),
            Self::Gt { key, value } => compare(event, key, value, Ordering::is_gt),
            Self::Ge { key, value } => compare(event, key, value, Ordering::is_ge),
            Self::Lt { key, value } => compare(event, key, value, Ordering::is_lt),
            Self::Le { key, value } => compare(event, key, value, Ordering::is_le),
            Self::Contains {
                key,
                value,
                case_sensitive,
            } => substring(event, key, value, *case_sensitive).unwrap_or(false),
            Self::NotContains {
                key,
                value,
                case_sensitive,
            } => substring(event, key, value, *case_sensitive).is_some_and(|found| !found),
            Self::In { key, values } => event.get(key).is_some_and(|v| member(v, values)),
            Self::NotIn { key, values } => event.get(key).is_some_and(|v| !member(v, values)),
            Self::Intersects { key, values } => intersects(event, key, values).unwrap_or(false),
            Self::NotIntersects { key, values } => {
                intersects(event, key, values).is_some_and(|found| !found)
            }
            Self::ListContains { key, value } => {
                list_contains(event, key, value).unwrap_or(false)
            }
            Self::ListNotContains { key, value } => {
                list_contains(event, key, value).is_some_and(|found| !found)
            }
            Self::Custom { name, params } => {
                let condition = extensions
                    .condition(name)
                    .ok_or_else(|| format!("no custom condition registered as {name:?}"))?;
                return condition.check(event, params);
            }
        };
        Ok(passed)
    }
}

/// Equality that treats `1` and `1.0` as the same number.
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) if left.is_number() && right.is_number() => l == r,
        _ => left == right,
    }
}

/// Numbers compare numerically and strings lexicographically; any other
/// pairing is unordered and fails the comparison.
fn ordering(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

fn compare(event: &Event, key: &str, target: &Value, accept: fn(Ordering) -> bool) -> bool {
    event
        .get(key)
        .and_then(|value| ordering(value, target))
        .is_some_and(accept)
}

/// `None` when the field is absent or not a string.
fn substring(event: &Event, key: &str, needle: &str, case_sensitive: bool) -> Option<bool> {
    let haystack = event.get(key)?.as_str()?;
    if case_sensitive {
        Some(haystack.contains(needle))
    } else {
        Some(haystack.to_lowercase().contains(&needle.to_lowercase()))
    }
}

fn member(value: &Value, values: &[Value]) -> bool {
    values.iter().any(|candidate| loose_eq(value, candidate))
}

/// `None` when the field is absent or not a list.
fn intersects(event: &Event, key: &str, values: &[Value]) -> Option<bool> {
    let items = event.get(key)?.as_array()?;
    Some(items.iter().any(|item| member(item, values)))
}

fn list_contains(event: &Event, key: &str, value: &Value) -> Option<bool> {
    let items = event.get(key)?.as_array()?;
    Some(items.iter().any(|item| loose_eq(item, value)))
}

/// AND-combines a condition set. An empty set passes.
pub fn all_pass(
    conditions: &[Condition],
    event: &Event,
    extensions: &Extensions,
) -> Result<bool, ExtensionError> {
    for condition in conditions {
        if !condition.check(event, extensions)? {
            return Ok(false);
        }
    }
    Ok(true)
}
