//! Configuration loading and validation.
//!
//! JSON5 file at `$LANYARD_STATE_DIR/lanyard.json` (default
//! `~/.lanyard/lanyard.json`). Every field has a default, so an empty or
//! missing file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::identity::DanglingPolicy;
use crate::secrets::Secret;
use crate::validation::RegistrationPolicy;

/// Environment variable overriding the session signing secret.
pub const ENV_SESSION_SECRET: &str = "LANYARD_SESSION_SECRET";
/// Environment variable overriding the Discord client secret.
pub const ENV_DISCORD_CLIENT_SECRET: &str = "LANYARD_DISCORD_CLIENT_SECRET";
/// Environment variable overriding the listen port.
pub const ENV_PORT: &str = "LANYARD_PORT";
/// Environment variable overriding the state directory.
pub const ENV_STATE_DIR: &str = "LANYARD_STATE_DIR";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error reading config file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON5 parsing error.
    #[error("Parse error: {0}")]
    Parse(#[from] json5::Error),

    /// Config validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session cookies and storage.
    #[serde(default)]
    pub session: SessionConfig,

    /// Registration limits.
    #[serde(default)]
    pub registration: RegistrationPolicy,

    /// Discord login and community link.
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Login rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Config {
    /// Load configuration from the default location, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Returns error if config cannot be loaded or parsed.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = json5::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a path.
    ///
    /// # Errors
    ///
    /// Returns error if serialization or file write fails.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        std::fs::write(path, content)?;

        // The file holds the session secret.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Get the default config file path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        Self::state_dir().join("lanyard.json")
    }

    /// Get the Lanyard state directory.
    ///
    /// Uses `LANYARD_STATE_DIR` env var if set, otherwise `~/.lanyard`.
    #[must_use]
    pub fn state_dir() -> PathBuf {
        if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
            PathBuf::from(dir)
        } else if let Some(home) = dirs::home_dir() {
            home.join(".lanyard")
        } else {
            PathBuf::from(".lanyard")
        }
    }

    /// Directory holding the user and session databases.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.server
            .data_dir
            .clone()
            .unwrap_or_else(|| Self::state_dir().join("data"))
    }

    /// Apply overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if an override has an invalid value.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by the `ENV_*` names.
    ///
    /// # Errors
    ///
    /// Returns error if an override has an invalid value.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(secret) = lookup(ENV_SESSION_SECRET).filter(|s| !s.is_empty()) {
            self.session.secret = Some(Secret::new(secret));
        }

        if let Some(secret) = lookup(ENV_DISCORD_CLIENT_SECRET).filter(|s| !s.is_empty()) {
            match self.discord.oauth.as_mut() {
                Some(oauth) => oauth.client_secret = Secret::new(secret),
                None => tracing::warn!(
                    "{ENV_DISCORD_CLIENT_SECRET} is set but Discord OAuth is not configured"
                ),
            }
        }

        if let Some(port) = lookup(ENV_PORT) {
            self.server.port = port
                .parse()
                .map_err(|_| ConfigError::Validation(format!("{ENV_PORT} is not a port: {port}")))?;
        }

        self.validate()
    }

    /// Make sure a session secret exists, generating one if needed.
    ///
    /// Returns whether a secret was generated. A generated secret only lives
    /// as long as the process unless the config is saved.
    pub fn ensure_session_secret(&mut self) -> bool {
        if self.session.secret.as_ref().is_some_and(|s| !s.is_empty()) {
            return false;
        }
        tracing::warn!("No session secret configured, generated a random one");
        self.session.secret = Some(Secret::generate());
        true
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("Server port cannot be 0".to_string()));
        }
        if self.server.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Request timeout cannot be 0".to_string(),
            ));
        }
        if self.session.ttl_secs == 0 {
            return Err(ConfigError::Validation("Session TTL cannot be 0".to_string()));
        }
        if self.session.purge_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Session purge interval cannot be 0".to_string(),
            ));
        }
        if self.session.cookie_name.is_empty()
            || !self
                .session
                .cookie_name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(ConfigError::Validation(format!(
                "Invalid cookie name: {:?}",
                self.session.cookie_name
            )));
        }

        let reg = &self.registration;
        if reg.min_password_len == 0 || reg.min_password_len > reg.max_password_len {
            return Err(ConfigError::Validation(format!(
                "Invalid password length range {}..={}",
                reg.min_password_len, reg.max_password_len
            )));
        }
        if reg.max_username_len == 0 {
            return Err(ConfigError::Validation(
                "Maximum username length cannot be 0".to_string(),
            ));
        }

        if let Some(oauth) = &self.discord.oauth {
            if oauth.client_id.is_empty() || oauth.redirect_uri.is_empty() {
                return Err(ConfigError::Validation(
                    "Discord OAuth needs clientId and redirectUri".to_string(),
                ));
            }
        }

        if self.rate_limit.login_per_minute == 0 {
            return Err(ConfigError::Validation(
                "Login rate limit cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address mode.
    #[serde(default)]
    pub mode: BindMode,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Database directory; defaults to `<state dir>/data`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            mode: BindMode::default(),
            timeout_secs: default_timeout(),
            data_dir: None,
        }
    }
}

impl ServerConfig {
    /// The address to bind, from the mode.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        match &self.mode {
            BindMode::Local => "127.0.0.1",
            BindMode::Public => "0.0.0.0",
            BindMode::Custom(host) => host,
        }
    }

    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

const fn default_port() -> u16 {
    9432
}

const fn default_timeout() -> u64 {
    30
}

/// Server bind mode.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Bind to localhost only.
    #[default]
    Local,
    /// Bind to all interfaces.
    Public,
    /// Custom bind address.
    Custom(String),
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Cookie signing key. Generated at start-up when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,

    /// Cookie name.
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,

    /// Mark the cookie `Secure`.
    #[serde(default)]
    pub secure_cookie: bool,

    /// Idle lifetime of a session in seconds. Active sessions are renewed
    /// once less than half of it remains.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// How often expired sessions are purged, in seconds.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,

    /// Treatment of members whose record was deleted.
    #[serde(default)]
    pub dangling: DanglingPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secret: None,
            cookie_name: default_cookie_name(),
            secure_cookie: false,
            ttl_secs: default_ttl(),
            purge_interval_secs: default_purge_interval(),
            dangling: DanglingPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Session lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Purge interval.
    #[must_use]
    pub const fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }
}

fn default_cookie_name() -> String {
    "lanyard.sid".to_string()
}

const fn default_ttl() -> u64 {
    14 * 24 * 60 * 60
}

const fn default_purge_interval() -> u64 {
    60 * 60
}

/// Discord settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordConfig {
    /// OAuth application; login with Discord is off when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<DiscordOAuthConfig>,

    /// Community invite that `GET /discord` redirects to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite: Option<String>,
}

/// Discord OAuth application credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordOAuthConfig {
    /// Application client id.
    pub client_id: String,

    /// Application client secret.
    pub client_secret: Secret,

    /// Callback URL registered with Discord.
    pub redirect_uri: String,

    /// Requested scopes.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec!["identify".to_string()]
}

/// Rate limits on credential endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    /// Attempts per client address per minute on `/login` and `/register`.
    #[serde(default = "default_login_per_minute")]
    pub login_per_minute: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            login_per_minute: default_login_per_minute(),
        }
    }
}

const fn default_login_per_minute() -> u32 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 9432);
        assert_eq!(config.session.cookie_name, "lanyard.sid");
        assert_eq!(config.session.dangling, DanglingPolicy::Prune);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("lanyard.json");

        let mut config = Config::default();
        config.session.secret = Some(Secret::new("s3cret"));
        config.discord.invite = Some("https://discord.gg/abc".to_string());

        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.session.secret.unwrap().expose(), "s3cret");
    }

    #[test]
    fn test_json5_parsing() {
        let json5_content = r#"{
            // comments and trailing commas are fine
            server: {
                port: 8080,
                mode: "public",
            },
            session: {
                dangling: "retain",
            },
            discord: {
                oauth: {
                    clientId: "764615973553963019",
                    clientSecret: "abc",
                    redirectUri: "http://localhost:8080/oauth/discord/callback",
                },
            },
        }"#;

        let config: Config = json5::from_str(json5_content).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind_host(), "0.0.0.0");
        assert_eq!(config.session.dangling, DanglingPolicy::Retain);
        let oauth = config.discord.oauth.unwrap();
        assert_eq!(oauth.scopes, vec!["identify".to_string()]);
        assert_eq!(format!("{:?}", oauth.client_secret), "Secret([REDACTED])");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.registration.min_password_len = 10;
        config.registration.max_password_len = 5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.session.cookie_name = "bad name;".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_purge_interval_rejected() {
        let mut config = Config::default();
        config.session.purge_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_zero_request_timeout_rejected() {
        let mut config = Config::default();
        config.server.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let parsed: Config = json5::from_str("{ server: { timeoutSecs: 0 } }").unwrap();
        assert!(parsed.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_SESSION_SECRET, "from-env"),
            (ENV_PORT, "8181"),
            (ENV_DISCORD_CLIENT_SECRET, "ignored"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| (*v).to_string()))
            .unwrap();

        assert_eq!(config.server.port, 8181);
        assert_eq!(config.session.secret.unwrap().expose(), "from-env");
        assert!(config.discord.oauth.is_none());
    }

    #[test]
    fn test_bad_port_override() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| (key == ENV_PORT).then(|| "nope".to_string()));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_ensure_session_secret() {
        let mut config = Config::default();
        assert!(config.ensure_session_secret());
        let first = config.session.secret.clone();
        assert!(!config.ensure_session_secret());
        assert_eq!(config.session.secret, first);
    }
}
