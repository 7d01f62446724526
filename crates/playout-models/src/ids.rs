//! Identifier newtypes.
//!
//! Every record kind gets its own string-backed id so that a room id can
//! never be passed where a transition id is expected.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a new random ID.
            pub fn new() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Create from an existing string.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Get the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Root aggregate identifier.
    ConferenceId
);
string_id!(ContentItemId);
string_id!(ContentGroupId);
string_id!(
    /// Identifier of a broadcast content item (the unit a switcher shows).
    BroadcastContentItemId
);
string_id!(PrepareJobId);
string_id!(RenderJobId);
string_id!(RoomId);
string_id!(EventId);
string_id!(TransitionId);
string_id!(ExecutedTransitionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique_and_transparent() {
        let a = RoomId::new();
        let b = RoomId::new();
        assert_ne!(a, b);

        let id = TransitionId::from("t-1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t-1\"");
        assert_eq!(id.to_string(), "t-1");
    }

    #[test]
    fn test_ids_order_lexically() {
        assert!(TransitionId::from("a") < TransitionId::from("b"));
    }
}
