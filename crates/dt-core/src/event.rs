//! Caller-supplied records that trackers are evaluated against.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// An event was not a JSON object.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("event must be a JSON object, got {found}")]
pub struct NotAnObject {
    found: &'static str,
}

/// An immutable mapping of field names to values.
///
/// No schema is enforced. Fields are addressed with dotted paths
/// (`"order.items.0.price"`); array elements are addressed by index.
/// A missing path is reported as `None`, which conditions treat as a
/// distinct "absent" state rather than an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(Map<String, Value>);

impl Event {
    /// Creates an event from a JSON object map.
    pub const fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Resolves a dotted path.
    pub fn get(&self, path: &str) -> Option<&Value> {
        // A literal key containing dots wins over path traversal.
        if let Some(value) = self.0.get(path) {
            return Some(value);
        }
        let mut segments = path.split('.');
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Returns true if the path resolves to any value, including `null`.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Resolves a path to a number, if the value there is numeric.
    pub fn number(&self, path: &str) -> Option<f64> {
        self.get(path).and_then(Value::as_f64)
    }

    /// Returns the underlying field map.
    pub const fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Event {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl TryFrom<Value> for Event {
    type Error = NotAnObject;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Err(NotAnObject { found: "null" }),
            Value::Bool(_) => Err(NotAnObject { found: "a boolean" }),
            Value::Number(_) => Err(NotAnObject { found: "a number" }),
            Value::String(_) => Err(NotAnObject { found: "a string" }),
            Value::Array(_) => Err(NotAnObject { found: "an array" }),
        }
    }
}
