//! Session storage backed by sled.

use std::time::Duration;

use async_trait::async_trait;

use lanyard_core::store::{SessionPayload, SessionStore, StoreError};
use lanyard_core::types::SessionId;

const SESSIONS_TREE: &str = "sessions";

/// Session store backed by a sled tree, keyed by session id.
pub struct SledSessionStore {
    tree: sled::Tree,
    ttl: Duration,
}

impl SledSessionStore {
    /// Open the sessions tree of an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened.
    pub fn with_db(db: &sled::Db, ttl: Duration) -> Result<Self, StoreError> {
        let tree = db
            .open_tree(SESSIONS_TREE)
            .map_err(|e| StoreError::Storage(format!("Failed to open sessions tree: {e}")))?;
        Ok(Self { tree, ttl })
    }

    /// Number of stored sessions, expired or not.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tree.len()
    }
}

#[async_trait]
impl SessionStore for SledSessionStore {
    async fn load(&self, id: &SessionId) -> Result<SessionPayload, StoreError> {
        let value = self
            .tree
            .get(id.as_str().as_bytes())
            .map_err(|e| StoreError::Storage(format!("Get error: {e}")))?;

        let Some(value) = value else {
            return Ok(SessionPayload::new(self.ttl));
        };

        match serde_json::from_slice::<SessionPayload>(&value) {
            Ok(payload) if !payload.is_expired() => Ok(payload),
            Ok(_) => {
                tracing::debug!(session = ?id, "Session expired");
                Ok(SessionPayload::new(self.ttl))
            }
            Err(e) => {
                tracing::warn!(session = ?id, error = %e, "Discarding unreadable session");
                Ok(SessionPayload::new(self.ttl))
            }
        }
    }

    async fn save(&self, id: &SessionId, payload: &SessionPayload) -> Result<(), StoreError> {
        let mut payload = payload.clone();
        payload.renew(self.ttl);

        let value = serde_json::to_vec(&payload)
            .map_err(|e| StoreError::Storage(format!("Serialization error: {e}")))?;
        self.tree
            .insert(id.as_str().as_bytes(), value)
            .map_err(|e| StoreError::Storage(format!("Insert error: {e}")))?;
        self.tree
            .flush()
            .map_err(|e| StoreError::Storage(format!("Flush error: {e}")))?;
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), StoreError> {
        self.tree
            .remove(id.as_str().as_bytes())
            .map_err(|e| StoreError::Storage(format!("Delete error: {e}")))?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut purged = 0;

        for result in self.tree.iter() {
            let (key, value) =
                result.map_err(|e| StoreError::Storage(format!("Iter error: {e}")))?;

            // Unreadable payloads can never load again.
            let stale = serde_json::from_slice::<SessionPayload>(&value)
                .map_or(true, |payload| payload.is_expired());
            if stale {
                self.tree
                    .remove(&key)
                    .map_err(|e| StoreError::Storage(format!("Delete error: {e}")))?;
                purged += 1;
            }
        }

        if purged > 0 {
            self.tree
                .flush()
                .map_err(|e| StoreError::Storage(format!("Flush error: {e}")))?;
        }
        Ok(purged)
    }
}
