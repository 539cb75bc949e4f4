//! Gateway server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, extract::FromRef};

use lanyard_core::config::Config;
use lanyard_core::store::{CredentialStore, SessionStore};

use crate::GatewayError;
use crate::auth::{
    AuthState, CookieSigner, SledCredentialStore, SledSessionStore, open_database,
};
use crate::middleware::GatewayRateLimiter;
use crate::oauth::{DiscordOAuth, OAuthProvider};
use crate::routes;

/// Gateway server state shared across handlers.
#[derive(Clone)]
pub struct GatewayState {
    /// Stores and cookie codec.
    pub auth: Arc<AuthState>,
    /// Login with Discord, when configured.
    pub oauth: Option<Arc<dyn OAuthProvider>>,
    /// Credential endpoint limiter.
    pub limiter: Arc<GatewayRateLimiter>,
    /// Effective configuration.
    pub config: Arc<Config>,
}

impl FromRef<GatewayState> for Arc<AuthState> {
    fn from_ref(state: &GatewayState) -> Self {
        state.auth.clone()
    }
}

impl std::fmt::Debug for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayState")
            .field("auth", &self.auth)
            .field("oauth", &self.oauth.as_ref().map(|p| p.name().to_string()))
            .finish_non_exhaustive()
    }
}

/// Gateway server.
pub struct Gateway {
    state: GatewayState,
}

/// Builder for constructing a Gateway with its dependencies.
///
/// Stores not supplied explicitly are opened from the sled database under
/// the configured data directory.
pub struct GatewayBuilder {
    config: Config,
    users: Option<Arc<dyn CredentialStore>>,
    sessions: Option<Arc<dyn SessionStore>>,
    oauth: Option<Arc<dyn OAuthProvider>>,
}

impl GatewayBuilder {
    /// Create a new builder with default config.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            users: None,
            sessions: None,
            oauth: None,
        }
    }

    /// Set gateway configuration.
    #[must_use]
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use a specific credential store.
    #[must_use]
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.users = Some(store);
        self
    }

    /// Use a specific session store.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.sessions = Some(store);
        self
    }

    /// Use a specific OAuth provider instead of the configured one.
    #[must_use]
    pub fn with_oauth(mut self, provider: Arc<dyn OAuthProvider>) -> Self {
        self.oauth = Some(provider);
        self
    }

    /// Build the gateway.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the database
    /// cannot be opened.
    pub fn build(mut self) -> Result<Gateway, GatewayError> {
        self.config.ensure_session_secret();
        self.config
            .validate()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        let session = &self.config.session;
        let (users, sessions) = match (self.users, self.sessions) {
            (Some(users), Some(sessions)) => (users, sessions),
            (users, sessions) => {
                let data_dir = self.config.data_dir();
                std::fs::create_dir_all(&data_dir)
                    .map_err(|e| GatewayError::Config(format!("Failed to create data dir: {e}")))?;
                let db = open_database(&data_dir).map_err(|e| GatewayError::Server(e.to_string()))?;
                tracing::debug!(path = %data_dir.display(), "Opened database");

                let users = match users {
                    Some(users) => users,
                    None => Arc::new(
                        SledCredentialStore::with_db(&db)
                            .map_err(|e| GatewayError::Server(e.to_string()))?,
                    ),
                };
                let sessions = match sessions {
                    Some(sessions) => sessions,
                    None => Arc::new(
                        SledSessionStore::with_db(&db, session.ttl())
                            .map_err(|e| GatewayError::Server(e.to_string()))?,
                    ),
                };
                (users, sessions)
            }
        };

        let secret = session
            .secret
            .as_ref()
            .ok_or_else(|| GatewayError::Config("Session secret is missing".to_string()))?;
        let cookies = CookieSigner::new(
            secret,
            session.cookie_name.clone(),
            session.secure_cookie,
            session.ttl(),
        );
        let auth = Arc::new(AuthState::new(users, sessions, cookies, session.dangling));

        let oauth = self.oauth.or_else(|| {
            self.config
                .discord
                .oauth
                .clone()
                .map(|oauth| Arc::new(DiscordOAuth::new(oauth)) as Arc<dyn OAuthProvider>)
        });
        if oauth.is_none() {
            tracing::debug!("Discord login disabled");
        }

        let limiter = Arc::new(GatewayRateLimiter::new(
            self.config.rate_limit.login_per_minute,
        ));

        Ok(Gateway {
            state: GatewayState {
                auth,
                oauth,
                limiter,
                config: Arc::new(self.config),
            },
        })
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl Gateway {
    /// Create a gateway with sled-backed stores.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid or the database
    /// cannot be opened.
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        GatewayBuilder::new().with_config(config).build()
    }

    /// Shared handler state.
    #[must_use]
    pub const fn state(&self) -> &GatewayState {
        &self.state
    }

    /// The HTTP application.
    #[must_use]
    pub fn router(&self) -> Router {
        routes::router(self.state.clone())
    }

    /// Run the gateway server until Ctrl-C.
    ///
    /// # Errors
    ///
    /// Returns error if the listener cannot bind or the server fails.
    pub async fn run(&self) -> Result<(), GatewayError> {
        let server = &self.state.config.server;
        let host = server.bind_host();
        let listener = tokio::net::TcpListener::bind((host, server.port)).await?;
        let addr = listener.local_addr()?;

        let housekeeping = tokio::spawn(housekeeping(self.state.clone()));

        tracing::info!("Lanyard listening on http://{}", addr);

        let app = self.router();
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await;

        housekeeping.abort();
        result.map_err(|e| GatewayError::Server(e.to_string()))
    }
}

/// Periodically purge expired sessions and idle rate limiter entries.
async fn housekeeping(state: GatewayState) {
    let mut interval = tokio::time::interval(state.config.session.purge_interval());
    loop {
        interval.tick().await;
        match state.auth.sessions.purge_expired().await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(purged, "Purged expired sessions"),
            Err(e) => tracing::warn!(error = %e, "Session purge failed"),
        }
        state.limiter.retain_recent();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanyard_core::store::{MemoryCredentialStore, MemorySessionStore};
    use std::time::Duration;

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.server.data_dir = Some(dir.to_path_buf());
        config
    }

    #[test]
    fn test_builder_opens_sled_stores() {
        let temp = tempfile::tempdir().unwrap();
        let gateway = GatewayBuilder::new()
            .with_config(config_in(temp.path()))
            .build()
            .unwrap();

        assert!(temp.path().join("lanyard").exists());
        assert!(gateway.state().config.session.secret.is_some());
        assert!(gateway.state().oauth.is_none());
    }

    #[test]
    fn test_builder_with_memory_stores() {
        let temp = tempfile::tempdir().unwrap();
        let gateway = GatewayBuilder::new()
            .with_config(config_in(temp.path()))
            .with_credential_store(Arc::new(MemoryCredentialStore::new()))
            .with_session_store(Arc::new(MemorySessionStore::new(Duration::from_secs(60))))
            .build()
            .unwrap();

        assert!(!temp.path().join("lanyard").exists());
        let _ = gateway.router();
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let mut config = Config::default();
        config.server.port = 0;

        let result = GatewayBuilder::new().with_config(config).build();
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }

    #[tokio::test]
    async fn test_housekeeping_purges_sessions() {
        let sessions = Arc::new(MemorySessionStore::new(Duration::ZERO));
        let sid = lanyard_core::types::SessionId::generate();
        let mut payload = lanyard_core::store::SessionPayload::new(Duration::ZERO);
        payload.oauth_state = Some("state".to_string());
        sessions.save(&sid, &payload).await.unwrap();

        let mut config = Config::default();
        config.session.purge_interval_secs = 1;
        let gateway = GatewayBuilder::new()
            .with_config(config)
            .with_credential_store(Arc::new(MemoryCredentialStore::new()))
            .with_session_store(sessions.clone())
            .build()
            .unwrap();

        let task = tokio::spawn(housekeeping(gateway.state().clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        task.abort();

        assert!(sessions.is_empty().await);
    }
}
