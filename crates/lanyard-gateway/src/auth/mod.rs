//! Sessions and authentication for the gateway.
//!
//! This module provides:
//! - Sled-backed credential and session stores
//! - Signed session cookies
//! - Request extractors that hydrate a session's identities
//! - The error type handlers return

mod cookie;
mod middleware;
mod sessions;
mod users;

pub use cookie::CookieSigner;
pub use middleware::{AuthState, RequireUser, SessionUsers};
pub use sessions::SledSessionStore;
pub use users::SledCredentialStore;

use std::path::Path;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Serialize;
use thiserror::Error;

use lanyard_core::identity::IdentityError;
use lanyard_core::store::StoreError;
use lanyard_core::types::UserId;
use lanyard_core::user::PasswordError;
use lanyard_core::validation::ValidationError;

use crate::oauth::OAuthError;

/// Open the database holding users and sessions under `data_dir`.
///
/// # Errors
///
/// Returns error if the database cannot be opened (for example while
/// another process holds it).
pub fn open_database(data_dir: &Path) -> Result<sled::Db, StoreError> {
    sled::open(data_dir.join("lanyard"))
        .map_err(|e| StoreError::Storage(format!("Failed to open database: {e}")))
}

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Input failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Username or password did not match.
    #[error("{0}")]
    InvalidCredentials(&'static str),

    /// Identity operation refused.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Registration is switched off.
    #[error("Registration is closed")]
    RegistrationClosed,

    /// Optional feature not configured.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    /// OAuth flow failed.
    #[error(transparent)]
    OAuth(#[from] OAuthError),

    /// Too many attempts from this client.
    #[error("Too many attempts, try again later")]
    RateLimited,

    /// Backend storage failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Anything else that is our fault.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation {
                field: "username", ..
            } => Self::Validation(ValidationError::UsernameTaken),
            StoreError::UniqueViolation { field, value } => {
                Self::Internal(format!("{field} already bound: {value}"))
            }
            StoreError::NotFound(id) => Self::Identity(IdentityError::NotFound(UserId::new(id))),
            StoreError::Storage(msg) => Self::Storage(msg),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(e: PasswordError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
struct ApiErrorResponse {
    error: String,
    code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            Self::Identity(IdentityError::Unauthenticated) => {
                return Redirect::to("/login").into_response();
            }
            Self::Validation(ValidationError::UsernameTaken) => {
                (StatusCode::CONFLICT, "username_taken")
            }
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_failed"),
            Self::InvalidCredentials(_) => (StatusCode::UNAUTHORIZED, "invalid_credentials"),
            Self::Identity(IdentityError::Unauthorized(_)) => {
                (StatusCode::FORBIDDEN, "not_authenticated_as")
            }
            Self::Identity(IdentityError::NotFound(_)) => (StatusCode::NOT_FOUND, "user_not_found"),
            Self::RegistrationClosed => (StatusCode::FORBIDDEN, "registration_closed"),
            Self::NotConfigured(_) => (StatusCode::NOT_FOUND, "not_configured"),
            Self::OAuth(OAuthError::StateMismatch | OAuthError::Denied(_)) => {
                (StatusCode::BAD_REQUEST, "oauth_rejected")
            }
            Self::OAuth(_) => (StatusCode::BAD_GATEWAY, "oauth_failed"),
            Self::RateLimited => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            Self::Storage(_) | Self::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        let error = if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ApiErrorResponse { error, code })).into_response()
    }
}
