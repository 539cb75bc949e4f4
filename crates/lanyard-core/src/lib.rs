//! # Lanyard Core
//!
//! Domain types for the Lanyard multi-identity session provider.
//!
//! This crate provides:
//! - Identity sets: several signed-in users per browser session
//! - Per-request hydration and the login/switch/logout operations
//! - User records with Argon2 password hashing
//! - Credential and session store traits, with in-memory implementations
//! - Registration validation
//! - Configuration loading (JSON5 format)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod identity;
pub mod secrets;
pub mod store;
pub mod types;
pub mod user;
pub mod validation;

pub use config::{Config, ConfigError};
pub use identity::{
    DanglingPolicy, HydratedSession, IdentityError, IdentityKey, SessionIdentitySet, SessionState,
};
pub use secrets::Secret;
pub use store::{CredentialStore, SessionPayload, SessionStore, StoreError};
pub use types::{SessionId, UserId};
pub use user::{ExternalIdentity, NewUser, PublicUser, UserRecord};
pub use validation::{RegistrationPolicy, ValidationError, validate_registration};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::identity::{HydratedSession, IdentityKey, SessionIdentitySet};
    pub use crate::store::{CredentialStore, SessionStore};
    pub use crate::types::*;
    pub use crate::user::UserRecord;
}
