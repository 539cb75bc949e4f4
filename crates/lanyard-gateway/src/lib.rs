//! # Lanyard Gateway
//!
//! HTTP front end for the multi-identity session provider: signed session
//! cookies, login and registration, identity switching and Discord OAuth.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Sessions, cookies and the handler error type.
pub mod auth;
mod middleware;
/// OAuth login providers.
pub mod oauth;
mod routes;
mod server;

pub use auth::{ApiError, AuthState, RequireUser, SessionUsers, open_database};
pub use middleware::GatewayRateLimiter;
pub use oauth::{DiscordOAuth, OAuthError, OAuthProvider};
pub use server::{Gateway, GatewayBuilder, GatewayState};

use lanyard_core::config::Config;

/// Start the gateway server.
///
/// # Errors
///
/// Returns error if server fails to start.
pub async fn start(config: Config) -> Result<(), GatewayError> {
    let gateway = Gateway::new(config)?;
    gateway.run().await
}

/// Gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Server error.
    #[error("Server error: {0}")]
    Server(String),

    /// Configuration error.
    #[error("Config error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
