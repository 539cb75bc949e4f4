//! In-memory stores, for tests and ephemeral deployments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use super::{CredentialStore, SessionPayload, SessionStore, StoreError};
use crate::types::{SessionId, UserId};
use crate::user::{NewUser, UserRecord};

/// Credential store held in a hash map.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl MemoryCredentialStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a record outright. There is no such operation on the trait;
    /// this exists to simulate records vanishing underneath a session.
    pub async fn remove(&self, id: &UserId) -> Option<UserRecord> {
        self.users.write().await.remove(id)
    }

    /// Number of records.
    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.users.read().await.is_empty()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.users.read().await.get(id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_by_external_identity(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| {
                u.external()
                    .is_some_and(|e| e.provider == provider && e.external_id == external_id)
            })
            .cloned())
    }

    async fn create(&self, new: NewUser) -> Result<UserRecord, StoreError> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == new.username) {
            return Err(StoreError::duplicate_username(new.username));
        }

        let record = UserRecord::from_new(UserId::generate(), new);
        users.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn save(&self, record: &UserRecord) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        if !users.contains_key(&record.id) {
            return Err(StoreError::NotFound(record.id.to_string()));
        }
        if users
            .values()
            .any(|u| u.id != record.id && u.username == record.username)
        {
            return Err(StoreError::duplicate_username(record.username.clone()));
        }

        users.insert(record.id.clone(), record.clone());
        Ok(())
    }
}

/// Session store held in a hash map.
#[derive(Debug)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionPayload>>,
    ttl: Duration,
}

impl MemorySessionStore {
    /// An empty store whose sessions live for `ttl` after their last save.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of stored sessions, expired or not.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Whether nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &SessionId) -> Result<SessionPayload, StoreError> {
        match self.sessions.read().await.get(id) {
            Some(payload) if !payload.is_expired() => Ok(payload.clone()),
            _ => Ok(SessionPayload::new(self.ttl)),
        }
    }

    async fn save(&self, id: &SessionId, payload: &SessionPayload) -> Result<(), StoreError> {
        let mut payload = payload.clone();
        payload.renew(self.ttl);
        self.sessions.write().await.insert(id.clone(), payload);
        Ok(())
    }

    async fn destroy(&self, id: &SessionId) -> Result<(), StoreError> {
        self.sessions.write().await.remove(id);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, StoreError> {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, payload| !payload.is_expired());
        Ok(before - sessions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user::{DISCORD_PROVIDER, ExternalIdentity};

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = MemoryCredentialStore::new();
        let user = store
            .create(NewUser::local("alice", "secret", None).unwrap())
            .await
            .unwrap();

        assert_eq!(store.find_by_id(&user.id).await.unwrap(), Some(user.clone()));
        assert_eq!(
            store.find_by_username("alice").await.unwrap().map(|u| u.id),
            Some(user.id)
        );
        assert!(store.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username() {
        let store = MemoryCredentialStore::new();
        store
            .create(NewUser::local("alice", "secret", None).unwrap())
            .await
            .unwrap();
        let result = store
            .create(NewUser::local("alice", "other", None).unwrap())
            .await;

        assert!(matches!(result, Err(StoreError::UniqueViolation { field: "username", .. })));
    }

    #[tokio::test]
    async fn test_rename_collision_on_save() {
        let store = MemoryCredentialStore::new();
        store
            .create(NewUser::local("alice", "secret", None).unwrap())
            .await
            .unwrap();
        let mut bob = store
            .create(NewUser::local("bob", "secret", None).unwrap())
            .await
            .unwrap();

        bob.username = "alice".to_string();
        assert!(matches!(
            store.save(&bob).await,
            Err(StoreError::UniqueViolation { .. })
        ));
    }

    #[tokio::test]
    async fn test_find_by_external_identity() {
        let store = MemoryCredentialStore::new();
        let external = ExternalIdentity {
            provider: DISCORD_PROVIDER.to_string(),
            external_id: "42".to_string(),
            display_name: "nelly".to_string(),
            discriminator: None,
        };
        let user = store.create(NewUser::linked(external)).await.unwrap();

        let found = store
            .find_by_external_identity(DISCORD_PROVIDER, "42")
            .await
            .unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));
        assert!(
            store
                .find_by_external_identity("github", "42")
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_session_expiry() {
        let store = MemorySessionStore::new(Duration::ZERO);
        let id = SessionId::generate();
        let mut payload = SessionPayload::new(Duration::from_secs(60));
        payload.identities.set_active(UserId::new("user_a"));
        store.save(&id, &payload).await.unwrap();

        // Zero TTL: expired as soon as it is written.
        assert!(store.load(&id).await.unwrap().identities.is_empty());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_session_round_trip() {
        let store = MemorySessionStore::new(Duration::from_secs(60));
        let id = SessionId::generate();
        let mut payload = store.load(&id).await.unwrap();
        payload.identities.set_active(UserId::new("user_a"));
        store.save(&id, &payload).await.unwrap();

        let loaded = store.load(&id).await.unwrap();
        assert_eq!(loaded.identities, payload.identities);

        store.destroy(&id).await.unwrap();
        assert!(store.load(&id).await.unwrap().identities.is_empty());
    }
}
