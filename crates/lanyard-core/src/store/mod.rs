//! Storage seams: the credential store and the session store.
//!
//! Both are consumed through traits so the gateway can plug in sled-backed
//! implementations while tests use the in-memory ones from [`memory`].

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::identity::SessionIdentitySet;
use crate::types::{SessionId, UserId};
use crate::user::{NewUser, UserRecord};

pub use memory::{MemoryCredentialStore, MemorySessionStore};

/// Storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique field already holds this value.
    #[error("{field} already exists: {value}")]
    UniqueViolation {
        /// Name of the unique field.
        field: &'static str,
        /// Offending value.
        value: String,
    },

    /// The record to update does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Backend failure (I/O, serialization, corruption).
    #[error("Storage error: {0}")]
    Storage(String),
}

impl StoreError {
    /// Shorthand for a username collision.
    #[must_use]
    pub fn duplicate_username(username: impl Into<String>) -> Self {
        Self::UniqueViolation {
            field: "username",
            value: username.into(),
        }
    }
}

/// Persistent user records.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look a user up by id.
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Look a user up by username.
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Look a user up by the account it is bound to at an external provider.
    async fn find_by_external_identity(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<UserRecord>, StoreError>;

    /// Create a user, assigning a fresh id.
    ///
    /// Fails with [`StoreError::UniqueViolation`] if the username is taken.
    async fn create(&self, new: NewUser) -> Result<UserRecord, StoreError>;

    /// Persist changes to an existing user.
    ///
    /// Fails with [`StoreError::UniqueViolation`] if a renamed user collides
    /// and [`StoreError::NotFound`] if the id is unknown.
    async fn save(&self, record: &UserRecord) -> Result<(), StoreError>;

    /// Check a plaintext password against a record.
    fn verify_password(&self, record: &UserRecord, plaintext: &str) -> bool {
        record.verify_password(plaintext)
    }
}

/// Everything persisted for one browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Signed-in identities.
    #[serde(default)]
    pub identities: SessionIdentitySet,
    /// CSRF state of an OAuth flow in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<String>,
    /// When the session was first persisted.
    pub created_at: DateTime<Utc>,
    /// When the session stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl SessionPayload {
    /// An empty payload valid for `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            identities: SessionIdentitySet::new(),
            oauth_state: None,
            created_at: now,
            expires_at: expiry_after(now, ttl),
        }
    }

    /// Whether the payload outlived its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Push the expiry `ttl` into the future.
    pub fn renew(&mut self, ttl: Duration) {
        self.expires_at = expiry_after(Utc::now(), ttl);
    }
}

/// `now + ttl`, saturating at the end of representable time.
fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Persistent session payloads with expiry.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session. A missing or expired session yields a fresh empty payload.
    async fn load(&self, id: &SessionId) -> Result<SessionPayload, StoreError>;

    /// Persist a session, renewing its expiry.
    async fn save(&self, id: &SessionId, payload: &SessionPayload) -> Result<(), StoreError>;

    /// Delete a session.
    async fn destroy(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Delete every expired session, returning how many were removed.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_expiry() {
        let payload = SessionPayload::new(Duration::from_secs(60));
        assert!(!payload.is_expired());

        let mut stale = SessionPayload::new(Duration::ZERO);
        assert!(stale.is_expired());
        stale.renew(Duration::from_secs(60));
        assert!(!stale.is_expired());
    }

    #[test]
    fn test_payload_defaults_on_missing_fields() {
        let json = r#"{"created_at":"2024-01-01T00:00:00Z","expires_at":"2024-01-02T00:00:00Z"}"#;
        let payload: SessionPayload = serde_json::from_str(json).unwrap();
        assert!(payload.identities.is_empty());
        assert!(payload.oauth_state.is_none());
    }
}
