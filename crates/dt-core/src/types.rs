//! Identifier newtypes with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $name {
            type Error = ValidationError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// A validated group identifier.
    ///
    /// A group is the logical owner of a set of trackers: a user, a device,
    /// a session or an API client. It is the unit of storage and of locking.
    GroupId, "group ID"
);

define_string_id!(
    /// A validated tracker name, unique within its group.
    TrackerName, "tracker name"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_id_rejects_empty() {
        assert!(GroupId::new("").is_err());
        assert!(GroupId::new("user-42").is_ok());
    }

    #[test]
    fn tracker_name_rejects_empty() {
        let err = TrackerName::new("").unwrap_err();
        assert_eq!(err.to_string(), "tracker name cannot be empty");
    }

    #[test]
    fn group_id_serializes_as_plain_string() {
        let id = GroupId::new("device-7").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"device-7\"");
        let parsed: GroupId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn tracker_name_serde_rejects_empty() {
        let result: Result<TrackerName, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn ids_convert_from_str_slices() {
        let name = TrackerName::try_from("logins").unwrap();
        let s: &str = name.as_ref();
        assert_eq!(s, "logins");
    }
}
