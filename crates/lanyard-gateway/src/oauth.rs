//! OAuth login providers.
//!
//! The gateway only needs three things from a provider: where to send the
//! browser, how to trade the returned code for a token, and who the token
//! belongs to. [`DiscordOAuth`] does this against the Discord API.

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use thiserror::Error;

use lanyard_core::Secret;
use lanyard_core::config::DiscordOAuthConfig;
use lanyard_core::user::{DISCORD_PROVIDER, ExternalIdentity};

const DISCORD_API_BASE: &str = "https://discord.com/api";

/// OAuth errors.
#[derive(Error, Debug)]
pub enum OAuthError {
    /// Could not reach the provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The provider answered with an error.
    #[error("Provider error: {status} - {message}")]
    Provider {
        /// HTTP status code.
        status: u16,
        /// Error body.
        message: String,
    },

    /// Callback state does not match the one issued to this session.
    #[error("OAuth state mismatch")]
    StateMismatch,

    /// The user declined, or the callback carried no code.
    #[error("Authorization denied: {0}")]
    Denied(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// An OAuth2 authorization-code provider.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Provider name stored in [`ExternalIdentity::provider`].
    fn name(&self) -> &str;

    /// URL to send the browser to, carrying `state`.
    ///
    /// # Errors
    ///
    /// Returns error if the configured endpoints do not form a URL.
    fn authorization_url(&self, state: &str) -> Result<String, OAuthError>;

    /// Trade an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<Secret, OAuthError>;

    /// Fetch the profile the token belongs to.
    async fn fetch_profile(&self, token: &Secret) -> Result<ExternalIdentity, OAuthError>;
}

/// Discord OAuth client.
pub struct DiscordOAuth {
    client: Client,
    config: DiscordOAuthConfig,
    api_base: String,
}

impl DiscordOAuth {
    /// Create a client for the configured application.
    #[must_use]
    pub fn new(config: DiscordOAuthConfig) -> Self {
        Self::with_base_url(config, DISCORD_API_BASE)
    }

    /// Create with a custom API base URL.
    #[must_use]
    pub fn with_base_url(config: DiscordOAuthConfig, api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            config,
            api_base: api_base.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    discriminator: Option<String>,
}

impl DiscordUser {
    /// Accounts migrated to unique usernames report discriminator `"0"`.
    fn into_external(self) -> ExternalIdentity {
        ExternalIdentity {
            provider: DISCORD_PROVIDER.to_string(),
            external_id: self.id,
            display_name: self.username,
            discriminator: self.discriminator.filter(|d| !d.is_empty() && d != "0"),
        }
    }
}

async fn provider_error(response: reqwest::Response) -> OAuthError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    OAuthError::Provider { status, message }
}

#[async_trait]
impl OAuthProvider for DiscordOAuth {
    fn name(&self) -> &str {
        DISCORD_PROVIDER
    }

    fn authorization_url(&self, state: &str) -> Result<String, OAuthError> {
        let scope = self.config.scopes.join(" ");
        Url::parse_with_params(
            &format!("{}/oauth2/authorize", self.api_base),
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("state", state),
            ],
        )
        .map(String::from)
        .map_err(|e| OAuthError::Config(format!("Invalid authorize URL: {e}")))
    }

    async fn exchange_code(&self, code: &str) -> Result<Secret, OAuthError> {
        let url = format!("{}/oauth2/token", self.api_base);
        let response = self
            .client
            .post(&url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.expose()),
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }

        let token: TokenResponse = response.json().await?;
        Ok(Secret::new(token.access_token))
    }

    async fn fetch_profile(&self, token: &Secret) -> Result<ExternalIdentity, OAuthError> {
        let url = format!("{}/users/@me", self.api_base);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token.expose())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(provider_error(response).await);
        }

        let user: DiscordUser = response.json().await?;
        Ok(user.into_external())
    }
}
