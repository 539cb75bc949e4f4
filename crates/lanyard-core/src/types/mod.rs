//! Core identifier types used throughout Lanyard.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix for every id handed out by a credential store.
const USER_ID_PREFIX: &str = "user_";

/// Unique identifier for a user record.
///
/// Assigned by the credential store when the record is created and never
/// reused afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    /// Wrap an existing id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh, never-before-seen id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{USER_ID_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Opaque identifier of a browser session.
///
/// 32 random bytes, hex encoded.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Number of random bytes behind a session id.
    pub const BYTES: usize = 32;

    /// Generate a new random session id.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; Self::BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    /// Parse a session id received from a client.
    ///
    /// Returns `None` unless the value has the exact shape of a generated id.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let well_formed = value.len() == Self::BYTES * 2
            && value.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase());
        well_formed.then(|| Self(value.to_string()))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Session ids are bearer credentials; keep them out of logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}…)", &self.0[..8.min(self.0.len())])
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_user_ids_are_unique() {
        let a = UserId::generate();
        let b = UserId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("user_"));
    }

    #[test]
    fn test_session_id_parse() {
        let id = SessionId::generate();
        assert_eq!(id.as_str().len(), 64);
        assert_eq!(SessionId::parse(id.as_str()), Some(id));

        assert!(SessionId::parse("short").is_none());
        assert!(SessionId::parse(&"g".repeat(64)).is_none());
        assert!(SessionId::parse(&"A".repeat(64)).is_none());
    }

    #[test]
    fn test_session_id_debug_is_truncated() {
        let id = SessionId::generate();
        let debug = format!("{id:?}");
        assert!(!debug.contains(id.as_str()));
    }

    #[test]
    fn test_user_id_serializes_as_string() {
        let id = UserId::new("user_1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user_1\"");
    }
}
