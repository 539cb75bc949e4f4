//! Multi-identity sessions.
//!
//! A browser session may be signed in as several users at once. This module
//! provides:
//! - [`SessionIdentitySet`]: which users, and which one is active
//! - [`HydratedSession`]: the set resolved against the credential store for
//!   one request, plus the login/switch/logout transitions
//! - [`IdentityKey`]: how a user-ish value is turned into the id the set stores

mod hydrate;
mod key;
mod set;

pub use hydrate::{DanglingPolicy, HydratedSession, ResolvedUserCache};
pub use key::IdentityKey;
pub use set::{SessionIdentitySet, SessionState};

use thiserror::Error;

use crate::types::UserId;

/// Identity errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The session never authenticated as this user.
    #[error("Not authenticated as user {0}")]
    Unauthorized(UserId),

    /// No active identity.
    #[error("Authentication required")]
    Unauthenticated,

    /// The user's record could not be resolved.
    #[error("User not found: {0}")]
    NotFound(UserId),
}
