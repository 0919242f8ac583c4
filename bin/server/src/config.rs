//! Centralized server configuration.
//!
//! Loaded via the `config` crate from environment variables, with `__`
//! separating nested keys (`APPLE__CLIENT_ID`, `COOKIES__SECURE`).
//!
//! See [`ProviderConfig`](siwa_auth::ProviderConfig) for the Apple client
//! settings.

use serde::Deserialize;
use siwa_auth::ProviderConfig;

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Public scheme and host, used to resolve a relative callback URL.
    #[serde(default)]
    pub public_url: Option<String>,

    /// Sign in with Apple client configuration.
    pub apple: ProviderConfig,

    /// Cookie configuration.
    #[serde(default)]
    pub cookies: CookieConfig,

    /// Reject sign-ins Apple flags as unlikely to be a real person.
    #[serde(default)]
    pub reject_unverified_real_users: bool,
}

/// Cookie-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CookieConfig {
    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure: bool,
}

fn default_bind_address() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: default_secure_cookies(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(environment.separator("__").try_parsing(true))
            .build()?
            .try_deserialize()
    }
}
