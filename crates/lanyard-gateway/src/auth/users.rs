//! User storage backed by sled.

use async_trait::async_trait;

use lanyard_core::store::{CredentialStore, StoreError};
use lanyard_core::types::UserId;
use lanyard_core::user::{ExternalIdentity, NewUser, UserRecord};

const USERS_TREE: &str = "users";
const INDEX_PREFIX: &[u8] = b"idx:";

fn username_key(username: &str) -> String {
    format!("idx:username:{username}")
}

fn external_key(provider: &str, external_id: &str) -> String {
    format!("idx:external:{provider}:{external_id}")
}

fn storage(what: &str, e: impl std::fmt::Display) -> StoreError {
    StoreError::Storage(format!("{what}: {e}"))
}

/// Credential store backed by a sled tree.
///
/// Records live under their id; `idx:username:*` and `idx:external:*` keys
/// map unique fields back to ids. Index keys are claimed with
/// compare-and-swap so concurrent creates cannot both win a username.
pub struct SledCredentialStore {
    tree: sled::Tree,
}

impl SledCredentialStore {
    /// Open the users tree of an existing database.
    ///
    /// # Errors
    ///
    /// Returns error if the tree cannot be opened.
    pub fn with_db(db: &sled::Db) -> Result<Self, StoreError> {
        let tree = db
            .open_tree(USERS_TREE)
            .map_err(|e| storage("Failed to open users tree", e))?;
        Ok(Self { tree })
    }

    /// Count stored users.
    #[must_use]
    pub fn count(&self) -> usize {
        self.tree
            .iter()
            .filter(|r| r.as_ref().is_ok_and(|(k, _)| !k.starts_with(INDEX_PREFIX)))
            .count()
    }

    /// List all users, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error if storage fails.
    pub fn list(&self) -> Result<Vec<UserRecord>, StoreError> {
        let mut users = Vec::new();

        for result in self.tree.iter() {
            let (key, value) = result.map_err(|e| storage("Iter error", e))?;
            if key.starts_with(INDEX_PREFIX) {
                continue;
            }
            let user: UserRecord =
                serde_json::from_slice(&value).map_err(|e| storage("Deserialization error", e))?;
            users.push(user);
        }

        users.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(users)
    }

    fn get(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        match self.tree.get(id.as_bytes()) {
            Ok(Some(value)) => serde_json::from_slice(&value)
                .map(Some)
                .map_err(|e| storage("Deserialization error", e)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage("Get error", e)),
        }
    }

    fn get_by_index(&self, index_key: &str) -> Result<Option<UserRecord>, StoreError> {
        match self.tree.get(index_key.as_bytes()) {
            Ok(Some(id_bytes)) => self.get(&String::from_utf8_lossy(&id_bytes)),
            Ok(None) => Ok(None),
            Err(e) => Err(storage("Index lookup error", e)),
        }
    }

    /// Point `index_key` at `id` unless it already points elsewhere.
    fn claim(&self, index_key: &str, id: &UserId) -> Result<bool, StoreError> {
        let claimed = self
            .tree
            .compare_and_swap(
                index_key.as_bytes(),
                None::<&[u8]>,
                Some(id.as_str().as_bytes()),
            )
            .map_err(|e| storage("Index error", e))?;

        match claimed {
            Ok(()) => Ok(true),
            Err(existing) => Ok(existing.current.as_deref() == Some(id.as_str().as_bytes())),
        }
    }

    fn release(&self, index_key: &str) -> Result<(), StoreError> {
        self.tree
            .remove(index_key.as_bytes())
            .map_err(|e| storage("Index remove error", e))?;
        Ok(())
    }

    fn write(&self, record: &UserRecord) -> Result<(), StoreError> {
        let value = serde_json::to_vec(record).map_err(|e| storage("Serialization error", e))?;
        self.tree
            .insert(record.id.as_str().as_bytes(), value)
            .map_err(|e| storage("Insert error", e))?;
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush().map_err(|e| storage("Flush error", e))?;
        Ok(())
    }

    /// Run `commit`, releasing the `claimed` index keys if it fails.
    fn commit_claimed(
        &self,
        claimed: &[String],
        commit: impl FnOnce() -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let result = commit();
        if result.is_err() {
            for key in claimed {
                if let Err(e) = self.release(key) {
                    tracing::warn!(key = %key, error = %e, "Failed to release index key");
                }
            }
        }
        result
    }
}

fn external_index(external: Option<&ExternalIdentity>) -> Option<String> {
    external.map(|e| external_key(&e.provider, &e.external_id))
}

#[async_trait]
impl CredentialStore for SledCredentialStore {
    async fn find_by_id(&self, id: &UserId) -> Result<Option<UserRecord>, StoreError> {
        self.get(id.as_str())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        self.get_by_index(&username_key(username))
    }

    async fn find_by_external_identity(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<UserRecord>, StoreError> {
        self.get_by_index(&external_key(provider, external_id))
    }

    async fn create(&self, new: NewUser) -> Result<UserRecord, StoreError> {
        let record = UserRecord::from_new(UserId::generate(), new);

        let name_key = username_key(&record.username);
        if !self.claim(&name_key, &record.id)? {
            return Err(StoreError::duplicate_username(record.username));
        }
        let mut claimed = vec![name_key];

        if let Some(ext_key) = external_index(record.external()) {
            if !self.claim(&ext_key, &record.id)? {
                self.commit_claimed(&claimed, || {
                    Err(StoreError::UniqueViolation {
                        field: "external_id",
                        value: record
                            .external()
                            .map(|e| e.external_id.clone())
                            .unwrap_or_default(),
                    })
                })?;
            }
            claimed.push(ext_key);
        }

        self.commit_claimed(&claimed, || {
            self.write(&record)?;
            self.flush()
        })?;

        tracing::debug!(user_id = %record.id, username = %record.username, "Stored new user");
        Ok(record)
    }

    async fn save(&self, record: &UserRecord) -> Result<(), StoreError> {
        let existing = self
            .get(record.id.as_str())?
            .ok_or_else(|| StoreError::NotFound(record.id.to_string()))?;

        let renamed = existing.username != record.username;
        if renamed && !self.claim(&username_key(&record.username), &record.id)? {
            return Err(StoreError::duplicate_username(record.username.clone()));
        }

        let old_ext = external_index(existing.external());
        let new_ext = external_index(record.external());
        if new_ext != old_ext {
            if let Some(key) = &new_ext {
                if !self.claim(key, &record.id)? {
                    if renamed {
                        self.release(&username_key(&record.username))?;
                    }
                    return Err(StoreError::UniqueViolation {
                        field: "external_id",
                        value: record.external().map(|e| e.external_id.clone()).unwrap_or_default(),
                    });
                }
            }
            if let Some(key) = &old_ext {
                self.release(key)?;
            }
        }

        self.write(record)?;
        if renamed {
            self.release(&username_key(&existing.username))?;
        }
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanyard_core::user::DISCORD_PROVIDER;
    use tempfile::TempDir;

    fn open() -> (TempDir, SledCredentialStore) {
        let temp_dir = TempDir::new().unwrap();
        let db = sled::open(temp_dir.path()).unwrap();
        let store = SledCredentialStore::with_db(&db).unwrap();
        (temp_dir, store)
    }

    fn discord(id: &str, name: &str) -> ExternalIdentity {
        ExternalIdentity {
            provider: DISCORD_PROVIDER.to_string(),
            external_id: id.to_string(),
            display_name: name.to_string(),
            discriminator: Some("0001".to_string()),
        }
    }

    #[tokio::test]
    async fn test_user_store() {
        let (_dir, store) = open();
        assert_eq!(store.count(), 0);

        let user = store
            .create(NewUser::local("admin", "secret", None).unwrap())
            .await
            .unwrap();

        assert_eq!(store.count(), 1);
        let loaded = store.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(loaded, user);
        let by_name = store.find_by_username("admin").await.unwrap().unwrap();
        assert_eq!(by_name.id, user.id);
        assert!(by_name.verify_password("secret"));
    }

    #[tokio::test]
    async fn test_duplicate_user() {
        let (_dir, store) = open();
        store
            .create(NewUser::local("admin", "secret1", None).unwrap())
            .await
            .unwrap();

        let result = store
            .create(NewUser::local("admin", "secret2", None).unwrap())
            .await;

        assert!(matches!(result, Err(StoreError::UniqueViolation { field: "username", .. })));
        assert_eq!(store.count(), 1);
    }

    #[tokio::test]
    async fn test_rename_moves_index() {
        let (_dir, store) = open();
        let mut alice = store
            .create(NewUser::local("alice", "pw", None).unwrap())
            .await
            .unwrap();
        store
            .create(NewUser::local("bob", "pw", None).unwrap())
            .await
            .unwrap();

        alice.username = "bob".to_string();
        assert!(matches!(
            store.save(&alice).await,
            Err(StoreError::UniqueViolation { .. })
        ));

        alice.username = "alicia".to_string();
        store.save(&alice).await.unwrap();
        assert!(store.find_by_username("alice").await.unwrap().is_none());
        assert_eq!(
            store.find_by_username("alicia").await.unwrap().map(|u| u.id),
            Some(alice.id.clone())
        );

        // The old name is free again.
        store
            .create(NewUser::local("alice", "pw", None).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_external_lookup_and_uniqueness() {
        let (_dir, store) = open();
        let user = store
            .create(NewUser::linked(discord("42", "nelly")))
            .await
            .unwrap();
        assert_eq!(user.username, "discord://nelly:0001");

        let found = store
            .find_by_external_identity(DISCORD_PROVIDER, "42")
            .await
            .unwrap();
        assert_eq!(found.map(|u| u.id), Some(user.id));

        let mut clash = NewUser::linked(discord("42", "other"));
        clash.username = "different".to_string();
        assert!(matches!(
            store.create(clash).await,
            Err(StoreError::UniqueViolation { field: "external_id", .. })
        ));
        assert!(store.find_by_username("different").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_commit_releases_claims() {
        let (_dir, store) = open();
        let id = UserId::new("user_half_written");
        let keys = vec![username_key("alice"), external_key(DISCORD_PROVIDER, "42")];
        for key in &keys {
            assert!(store.claim(key, &id).unwrap());
        }

        let result = store.commit_claimed(&keys, || Err(StoreError::Storage("disk full".into())));
        assert!(matches!(result, Err(StoreError::Storage(_))));

        // Neither key is left pointing at a record that was never written.
        let user = store
            .create(NewUser::linked(discord("42", "alice")))
            .await
            .unwrap();
        store
            .create(NewUser::local("alice", "pw", None).unwrap())
            .await
            .unwrap();
        assert_eq!(
            store.find_by_external_identity(DISCORD_PROVIDER, "42").await.unwrap().map(|u| u.id),
            Some(user.id)
        );
    }

    #[tokio::test]
    async fn test_successful_commit_keeps_claims() {
        let (_dir, store) = open();
        let id = UserId::new("user_1");
        let keys = vec![username_key("bob")];
        assert!(store.claim(&keys[0], &id).unwrap());

        store.commit_claimed(&keys, || Ok(())).unwrap();

        let other = UserId::new("user_2");
        assert!(!store.claim(&keys[0], &other).unwrap());
    }

    #[tokio::test]
    async fn test_save_unknown_user() {
        let (_dir, store) = open();
        let ghost = UserRecord::from_new(
            UserId::new("user_ghost"),
            NewUser::local("ghost", "pw", None).unwrap(),
        );
        assert!(matches!(store.save(&ghost).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_skips_indexes() {
        let (_dir, store) = open();
        for name in ["a", "b", "c"] {
            store
                .create(NewUser::local(name, "pw", None).unwrap())
                .await
                .unwrap();
        }
        let names: Vec<String> = store.list().unwrap().into_iter().map(|u| u.username).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"b".to_string()));
    }
}
