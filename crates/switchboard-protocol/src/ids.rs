//! Typed ID wrappers for Switchboard.
//!
//! IDs are opaque String wrappers (serde-transparent) generated as UUID v4.
//! Keeping them as strings lets external systems (mail providers, telephony)
//! hand us their own identifiers without conversion.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Create a new random ID (UUID v4).
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// View as string slice.
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

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Unique identifier for a conversation session — the primary
    /// correlation key across channels.
    SessionId
);
typed_id!(
    /// Unique identifier for a conversation event.
    EventId
);
typed_id!(
    /// Unique identifier for a bus message.
    MessageId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_new_is_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn session_id_from_string() {
        let id = SessionId::from_string("sess-1");
        assert_eq!(id.as_str(), "sess-1");
        assert_eq!(id.to_string(), "sess-1");
    }

    #[test]
    fn typed_id_serde_roundtrip() {
        let id = EventId::from_string("EVT001");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"EVT001\"");
        let back: EventId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn typed_id_hash_equality() {
        use std::collections::HashSet;
        let a = SessionId::from_string("same");
        let b = SessionId::from_string("same");
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }
}
