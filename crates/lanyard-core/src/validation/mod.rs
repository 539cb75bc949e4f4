//! Validation of registration and profile input.
//!
//! Every check runs before anything touches the credential store, so a
//! rejected request never mutates state. Error messages are shown to users
//! verbatim.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use validator::ValidateEmail;

use crate::user::{NewUser, PasswordError, UserRecord};

/// Validation error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Username empty after trimming.
    #[error("username is required")]
    EmptyUsername,

    /// Username longer than the policy allows.
    #[error("username must be at most {max} characters")]
    UsernameTooLong {
        /// Maximum allowed length.
        max: usize,
    },

    /// Username contains control characters.
    #[error("username contains disallowed characters")]
    DisallowedChars,

    /// Username in a namespace reserved for linked accounts.
    #[error("usernames cannot begin with {prefix}")]
    ReservedPrefix {
        /// The matched prefix.
        prefix: String,
    },

    /// Username already held by another user.
    #[error("username already exists")]
    UsernameTaken,

    /// Email present but malformed.
    #[error("email is invalid, must be either valid or blank")]
    InvalidEmail,

    /// Password outside the allowed length range.
    #[error("password must be between {min} and {max} characters")]
    PasswordLength {
        /// Minimum length.
        min: usize,
        /// Maximum length.
        max: usize,
    },

    /// A password change whose current password did not verify.
    #[error("invalid current password")]
    InvalidCurrentPassword,
}

/// Limits applied to user-supplied credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistrationPolicy {
    /// Whether `POST /register` accepts new accounts.
    pub enabled: bool,
    /// Minimum password length in characters.
    pub min_password_len: usize,
    /// Maximum password length in characters.
    pub max_password_len: usize,
    /// Maximum username length in characters.
    pub max_username_len: usize,
    /// Username prefixes users cannot register under.
    pub reserved_prefixes: Vec<String>,
}

impl Default for RegistrationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_password_len: 4,
            max_password_len: 1024,
            max_username_len: 64,
            reserved_prefixes: vec!["discord://".to_string()],
        }
    }
}

/// Raw registration form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationInput {
    /// Requested username.
    pub username: String,
    /// Optional email; blank means none.
    #[serde(default)]
    pub email: Option<String>,
    /// Plaintext password.
    pub password: String,
}

/// A registration that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Normalised username.
    pub username: String,
    /// Email, if one was given.
    pub email: Option<String>,
    password: String,
}

impl Registration {
    /// Hash the password and produce the record to create.
    ///
    /// # Errors
    ///
    /// Returns error if hashing fails.
    pub fn into_new_user(self) -> Result<NewUser, PasswordError> {
        NewUser::local(self.username, &self.password, self.email)
    }
}

/// Validate a registration form.
///
/// Username uniqueness is not checked here; the credential store reports
/// collisions on create.
///
/// # Errors
///
/// Returns the first failed check.
pub fn validate_registration(
    input: &RegistrationInput,
    policy: &RegistrationPolicy,
) -> Result<Registration, ValidationError> {
    let username = validate_username(&input.username, policy)?;
    let email = validate_email(input.email.as_deref())?;
    validate_password(&input.password, policy)?;

    Ok(Registration {
        username,
        email,
        password: input.password.clone(),
    })
}

/// Trim and NFKC-normalise a username, as stored and looked up.
#[must_use]
pub fn normalize_username(raw: &str) -> String {
    raw.trim().nfkc().collect()
}

/// Normalise and check a username.
///
/// # Errors
///
/// Returns error if the username is empty, too long, contains control
/// characters, or starts with a reserved prefix.
pub fn validate_username(raw: &str, policy: &RegistrationPolicy) -> Result<String, ValidationError> {
    let username = normalize_username(raw);

    if username.is_empty() {
        return Err(ValidationError::EmptyUsername);
    }
    if username.chars().count() > policy.max_username_len {
        return Err(ValidationError::UsernameTooLong {
            max: policy.max_username_len,
        });
    }
    if username.chars().any(char::is_control) {
        return Err(ValidationError::DisallowedChars);
    }
    if let Some(prefix) = policy
        .reserved_prefixes
        .iter()
        .find(|p| username.starts_with(p.as_str()))
    {
        return Err(ValidationError::ReservedPrefix {
            prefix: prefix.clone(),
        });
    }

    Ok(username)
}

/// Check an optional email. Blank input counts as absent.
///
/// # Errors
///
/// Returns `InvalidEmail` for a non-blank, malformed address.
pub fn validate_email(raw: Option<&str>) -> Result<Option<String>, ValidationError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(email) => {
            let email = email.to_string();
            if email.validate_email() {
                Ok(Some(email))
            } else {
                Err(ValidationError::InvalidEmail)
            }
        }
    }
}

/// Check a password against the policy's length bounds.
///
/// # Errors
///
/// Returns `PasswordLength` when out of range.
pub fn validate_password(password: &str, policy: &RegistrationPolicy) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if len < policy.min_password_len || len > policy.max_password_len {
        return Err(ValidationError::PasswordLength {
            min: policy.min_password_len,
            max: policy.max_password_len,
        });
    }
    Ok(())
}

/// Raw account form. Every field is optional; blank fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileInput {
    /// New username.
    #[serde(default)]
    pub username: Option<String>,
    /// New email.
    #[serde(default)]
    pub email: Option<String>,
    /// Current password, required to change a password that exists.
    #[serde(default)]
    pub password: Option<String>,
    /// Replacement password.
    #[serde(default)]
    pub new_password: Option<String>,
}

/// A validated set of profile changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// New username, if it differs from the current one.
    pub username: Option<String>,
    /// New email.
    pub email: Option<String>,
    new_password: Option<String>,
}

impl ProfileUpdate {
    /// Whether there is nothing to change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.email.is_none() && self.new_password.is_none()
    }

    /// Apply the changes to `record`, bumping its modification time.
    ///
    /// # Errors
    ///
    /// Returns error if hashing the new password fails.
    pub fn apply(self, record: &mut UserRecord) -> Result<(), PasswordError> {
        if self.is_empty() {
            return Ok(());
        }
        if let Some(username) = self.username {
            record.username = username;
        }
        if let Some(email) = self.email {
            record.email = Some(email);
        }
        if let Some(password) = self.new_password {
            record.set_password(&password)?;
        }
        record.touch();
        Ok(())
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.as_str()).filter(|v| !v.trim().is_empty())
}

/// Validate an account form against the record it will modify.
///
/// Setting a new password on an account that already has one requires the
/// current password. Provider-only accounts may set a first password
/// without it.
///
/// # Errors
///
/// Returns the first failed check.
pub fn validate_profile_update(
    record: &UserRecord,
    input: &ProfileInput,
    policy: &RegistrationPolicy,
) -> Result<ProfileUpdate, ValidationError> {
    let mut update = ProfileUpdate::default();

    if let Some(raw) = non_blank(input.username.as_ref()) {
        // Resubmitting the current name is not a rename, even for linked accounts.
        if normalize_username(raw) != record.username {
            update.username = Some(validate_username(raw, policy)?);
        }
    }

    update.email = validate_email(input.email.as_deref())?;

    if let Some(new_password) = non_blank(input.new_password.as_ref()) {
        validate_password(new_password, policy)?;
        if record.password_hash().is_some() {
            let current = input.password.as_deref().unwrap_or_default();
            if !record.verify_password(current) {
                return Err(ValidationError::InvalidCurrentPassword);
            }
        }
        update.new_password = Some(new_password.to_string());
    }

    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;
    use crate::user::{DISCORD_PROVIDER, ExternalIdentity};
    use pretty_assertions::assert_eq;

    fn input(username: &str, email: Option<&str>, password: &str) -> RegistrationInput {
        RegistrationInput {
            username: username.to_string(),
            email: email.map(str::to_string),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_valid_registration() {
        let policy = RegistrationPolicy::default();
        let reg = validate_registration(&input("  alice ", Some("a@example.com"), "pass"), &policy)
            .unwrap();

        assert_eq!(reg.username, "alice");
        assert_eq!(reg.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_blank_email_is_absent() {
        let policy = RegistrationPolicy::default();
        let reg = validate_registration(&input("alice", Some("   "), "pass"), &policy).unwrap();
        assert_eq!(reg.email, None);

        let reg = validate_registration(&input("alice", None, "pass"), &policy).unwrap();
        assert_eq!(reg.email, None);
    }

    #[test]
    fn test_rejects_reserved_prefix() {
        let policy = RegistrationPolicy::default();
        let err = validate_registration(&input("discord://nelly:0001", None, "pass"), &policy)
            .unwrap_err();

        assert_eq!(
            err,
            ValidationError::ReservedPrefix {
                prefix: "discord://".to_string()
            }
        );
        assert_eq!(err.to_string(), "usernames cannot begin with discord://");
    }

    #[test]
    fn test_rejects_bad_email() {
        let policy = RegistrationPolicy::default();
        let err = validate_registration(&input("alice", Some("not-an-email"), "pass"), &policy)
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidEmail);
    }

    #[test]
    fn test_password_bounds() {
        let policy = RegistrationPolicy::default();
        assert!(validate_password("abc", &policy).is_err());
        assert!(validate_password("abcd", &policy).is_ok());
        assert!(validate_password(&"x".repeat(1024), &policy).is_ok());
        assert!(validate_password(&"x".repeat(1025), &policy).is_err());
    }

    #[test]
    fn test_username_rules() {
        let policy = RegistrationPolicy::default();
        assert_eq!(validate_username("   ", &policy), Err(ValidationError::EmptyUsername));
        assert_eq!(
            validate_username("bad\u{0007}name", &policy),
            Err(ValidationError::DisallowedChars)
        );
        assert!(matches!(
            validate_username(&"a".repeat(65), &policy),
            Err(ValidationError::UsernameTooLong { max: 64 })
        ));
        // fi ligature folds under NFKC
        assert_eq!(validate_username("\u{FB01}sh", &policy).unwrap(), "fish");
    }

    fn local_record() -> UserRecord {
        UserRecord::from_new(
            UserId::new("user_a"),
            NewUser::local("alice", "old-pass", None).unwrap(),
        )
    }

    #[test]
    fn test_profile_password_change_requires_current() {
        let policy = RegistrationPolicy::default();
        let record = local_record();

        let wrong = ProfileInput {
            password: Some("nope".to_string()),
            new_password: Some("new-pass".to_string()),
            ..Default::default()
        };
        assert_eq!(
            validate_profile_update(&record, &wrong, &policy),
            Err(ValidationError::InvalidCurrentPassword)
        );

        let right = ProfileInput {
            password: Some("old-pass".to_string()),
            new_password: Some("new-pass".to_string()),
            ..Default::default()
        };
        let mut record = record;
        validate_profile_update(&record, &right, &policy)
            .unwrap()
            .apply(&mut record)
            .unwrap();
        assert!(record.verify_password("new-pass"));
        assert!(!record.verify_password("old-pass"));
    }

    #[test]
    fn test_profile_linked_account_sets_first_password() {
        let policy = RegistrationPolicy::default();
        let mut record = UserRecord::from_new(
            UserId::new("user_d"),
            NewUser::linked(ExternalIdentity {
                provider: DISCORD_PROVIDER.to_string(),
                external_id: "42".to_string(),
                display_name: "nelly".to_string(),
                discriminator: None,
            }),
        );

        let input = ProfileInput {
            new_password: Some("first-pass".to_string()),
            ..Default::default()
        };
        validate_profile_update(&record, &input, &policy)
            .unwrap()
            .apply(&mut record)
            .unwrap();

        assert!(record.verify_password("first-pass"));
        assert!(record.external().is_some());
    }

    #[test]
    fn test_profile_blank_fields_ignored() {
        let policy = RegistrationPolicy::default();
        let record = local_record();
        let input = ProfileInput {
            username: Some(" ".to_string()),
            email: Some(String::new()),
            ..Default::default()
        };

        let update = validate_profile_update(&record, &input, &policy).unwrap();
        assert!(update.is_empty());
    }

    #[test]
    fn test_profile_same_username_is_no_change() {
        let policy = RegistrationPolicy::default();
        let record = local_record();
        let input = ProfileInput {
            username: Some("alice".to_string()),
            ..Default::default()
        };

        assert!(validate_profile_update(&record, &input, &policy).unwrap().is_empty());
    }
}
