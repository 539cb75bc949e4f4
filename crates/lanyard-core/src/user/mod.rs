//! User records and password hashing.

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::UserId;

/// Provider name used for Discord-linked accounts.
pub const DISCORD_PROVIDER: &str = "discord";

/// Errors raised while hashing credentials.
#[derive(Error, Debug)]
pub enum PasswordError {
    /// The hasher rejected the input.
    #[error("Password hashing failed: {0}")]
    Hash(String),
}

/// A binding to an account at a third-party identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Provider name (e.g. `discord`).
    pub provider: String,
    /// Provider-assigned account id.
    pub external_id: String,
    /// Display name at the provider.
    pub display_name: String,
    /// Legacy Discord discriminator, if the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<String>,
}

impl ExternalIdentity {
    /// Username used for accounts created from this identity.
    ///
    /// Lives under the `<provider>://` namespace, which local registration
    /// refuses, so the two can never collide.
    #[must_use]
    pub fn derived_username(&self) -> String {
        match &self.discriminator {
            Some(d) => format!("{}://{}:{d}", self.provider, self.display_name),
            None => format!("{}://{}", self.provider, self.display_name),
        }
    }
}

/// How a user proves who they are.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccountKind {
    /// Local account with a password.
    Local {
        /// Argon2 PHC string.
        password_hash: String,
    },
    /// Account that can only sign in through an external provider.
    Linked {
        /// The provider binding.
        external: ExternalIdentity,
    },
    /// Local password and an external binding.
    Both {
        /// Argon2 PHC string.
        password_hash: String,
        /// The provider binding.
        external: ExternalIdentity,
    },
}

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Unique, never reused id.
    pub id: UserId,
    /// Unique username.
    pub username: String,
    /// Optional email address.
    pub email: Option<String>,
    /// Credentials.
    pub account: AccountKind,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last modified.
    pub updated_at: DateTime<Utc>,
}

impl UserRecord {
    /// Build a record from creation fields and a store-assigned id.
    #[must_use]
    pub fn from_new(id: UserId, new: NewUser) -> Self {
        let now = Utc::now();
        Self {
            id,
            username: new.username,
            email: new.email,
            account: new.account,
            created_at: now,
            updated_at: now,
        }
    }

    /// The password hash, absent for provider-only accounts.
    #[must_use]
    pub fn password_hash(&self) -> Option<&str> {
        match &self.account {
            AccountKind::Local { password_hash } | AccountKind::Both { password_hash, .. } => {
                Some(password_hash)
            }
            AccountKind::Linked { .. } => None,
        }
    }

    /// The external binding, if any.
    #[must_use]
    pub fn external(&self) -> Option<&ExternalIdentity> {
        match &self.account {
            AccountKind::Linked { external } | AccountKind::Both { external, .. } => Some(external),
            AccountKind::Local { .. } => None,
        }
    }

    /// Check a plaintext password. Always false for provider-only accounts.
    #[must_use]
    pub fn verify_password(&self, password: &str) -> bool {
        self.password_hash()
            .is_some_and(|hash| verify_password(password, hash))
    }

    /// Replace the password, keeping any external binding.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    pub fn set_password(&mut self, password: &str) -> Result<(), PasswordError> {
        let password_hash = hash_password(password)?;
        self.account = match std::mem::replace(
            &mut self.account,
            AccountKind::Local {
                password_hash: String::new(),
            },
        ) {
            AccountKind::Local { .. } => AccountKind::Local { password_hash },
            AccountKind::Linked { external } | AccountKind::Both { external, .. } => {
                AccountKind::Both {
                    password_hash,
                    external,
                }
            }
        };
        self.touch();
        Ok(())
    }

    /// Attach or refresh the external binding.
    pub fn link_external(&mut self, external: ExternalIdentity) {
        self.account = match std::mem::replace(
            &mut self.account,
            AccountKind::Linked {
                external: external.clone(),
            },
        ) {
            AccountKind::Local { password_hash } | AccountKind::Both { password_hash, .. } => {
                AccountKind::Both {
                    password_hash,
                    external,
                }
            }
            AccountKind::Linked { .. } => AccountKind::Linked { external },
        };
        self.touch();
    }

    /// Bump the modification time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Safe projection for responses (no password hash).
    #[must_use]
    pub fn to_public(&self) -> PublicUser {
        PublicUser {
            id: self.id.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            external: self.external().cloned(),
            has_password: self.password_hash().is_some(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Public user representation (for responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    /// User id.
    pub id: UserId,
    /// Username.
    pub username: String,
    /// Email address.
    pub email: Option<String>,
    /// External binding.
    pub external: Option<ExternalIdentity>,
    /// Whether a local password is set.
    pub has_password: bool,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When last modified.
    pub updated_at: DateTime<Utc>,
}

/// Fields for a record that does not exist yet.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// Requested username.
    pub username: String,
    /// Optional email.
    pub email: Option<String>,
    /// Credentials, already hashed.
    pub account: AccountKind,
}

impl NewUser {
    /// A local account. Hashes the password.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    pub fn local(
        username: impl Into<String>,
        password: &str,
        email: Option<String>,
    ) -> Result<Self, PasswordError> {
        Ok(Self {
            username: username.into(),
            email,
            account: AccountKind::Local {
                password_hash: hash_password(password)?,
            },
        })
    }

    /// A provider-only account named after the external identity.
    #[must_use]
    pub fn linked(external: ExternalIdentity) -> Self {
        Self {
            username: external.derived_username(),
            email: None,
            account: AccountKind::Linked { external },
        }
    }
}

/// Hash a password using Argon2id.
///
/// # Errors
///
/// Returns error if hashing fails.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verify a password against a PHC hash. Malformed hashes never verify.
#[must_use]
pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        tracing::warn!("Stored password hash is malformed");
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discord(name: &str) -> ExternalIdentity {
        ExternalIdentity {
            provider: DISCORD_PROVIDER.to_string(),
            external_id: "80351110224678912".to_string(),
            display_name: name.to_string(),
            discriminator: Some("1337".to_string()),
        }
    }

    #[test]
    fn test_local_password_verification() {
        let new = NewUser::local("alice", "password123", None).unwrap();
        let user = UserRecord::from_new(UserId::generate(), new);

        assert!(user.verify_password("password123"));
        assert!(!user.verify_password("wrongpassword"));
        assert!(user.external().is_none());
    }

    #[test]
    fn test_linked_account_has_no_password() {
        let user = UserRecord::from_new(UserId::generate(), NewUser::linked(discord("nelly")));

        assert_eq!(user.username, "discord://nelly:1337");
        assert!(user.password_hash().is_none());
        assert!(!user.verify_password(""));
        assert!(!user.to_public().has_password);
    }

    #[test]
    fn test_set_password_on_linked_account_keeps_binding() {
        let mut user = UserRecord::from_new(UserId::generate(), NewUser::linked(discord("nelly")));
        user.set_password("hunter22").unwrap();

        assert!(matches!(user.account, AccountKind::Both { .. }));
        assert!(user.verify_password("hunter22"));
        assert_eq!(user.external().unwrap().display_name, "nelly");
    }

    #[test]
    fn test_link_external_on_local_account() {
        let new = NewUser::local("alice", "password123", None).unwrap();
        let mut user = UserRecord::from_new(UserId::generate(), new);
        user.link_external(discord("alice"));

        assert!(matches!(user.account, AccountKind::Both { .. }));
        assert!(user.verify_password("password123"));
    }

    #[test]
    fn test_derived_username_without_discriminator() {
        let mut external = discord("nelly");
        external.discriminator = None;
        assert_eq!(external.derived_username(), "discord://nelly");
    }

    #[test]
    fn test_public_projection_omits_hash() {
        let new = NewUser::local("alice", "password123", Some("a@example.com".into())).unwrap();
        let user = UserRecord::from_new(UserId::generate(), new);
        let json = serde_json::to_string(&user.to_public()).unwrap();

        assert!(!json.contains("argon2"));
        assert!(json.contains("a@example.com"));
    }

    #[test]
    fn test_malformed_hash_never_verifies() {
        assert!(!verify_password("x", "not-a-phc-string"));
    }
}
