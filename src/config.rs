//! Application configuration.
//!
//! Loaded from a TOML file with per-field defaults; a handful of
//! `AUTHGATE_*` environment variables override the file. The redirect
//! URI must exactly match the one registered with the identity provider
//! and the one used to obtain the authorization code; a mismatch is a
//! well-known class of exchange failure.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub idp: IdpConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Hosted identity provider endpoints and client registration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdpConfig {
    /// Base URL of the hosted IdP UI (login and logout live under it).
    #[serde(default)]
    pub base_url: String,
    /// OAuth2 client id registered with the provider.
    #[serde(default)]
    pub client_id: String,
    /// Redirect URI. Must exactly match the registered one.
    #[serde(default)]
    pub redirect_uri: String,
    /// Scopes requested at login, space-joined into the `scope` parameter.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

impl Default for IdpConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            client_id: String::new(),
            redirect_uri: String::new(),
            scopes: default_scopes(),
        }
    }
}

/// Backend token exchange endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeConfig {
    /// URL of the exchange endpoint (trades a code for tokens).
    #[serde(default)]
    pub url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_exchange_timeout")]
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: default_exchange_timeout(),
        }
    }
}

/// Protected API reachable with the session's bearer token.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ApiConfig {
    /// Default URL fetched by the data client.
    #[serde(default)]
    pub data_url: String,
}

/// Session persistence settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub storage_backend: StorageBackend,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_backend: StorageBackend::default(),
            storage_dir: default_storage_dir(),
        }
    }
}

/// Which storage backend persists the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    File,
    Memory,
    Keyring,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_scopes() -> Vec<String> {
    vec![
        "email".to_string(),
        "openid".to_string(),
        "phone".to_string(),
    ]
}

fn default_exchange_timeout() -> u64 {
    30
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".authgate")
}

fn default_log_level() -> String {
    "info".to_string()
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Falls back to defaults (with a warning) if the file does not
    /// exist. Environment overrides are applied afterwards.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `AUTHGATE_*` environment variable overrides.
    fn apply_env_overrides(&mut self) {
        macro_rules! env_str {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                }
            };
        }
        macro_rules! env_path {
            ($env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = PathBuf::from(val);
                }
            };
        }

        env_str!("AUTHGATE_IDP_URL", self.idp.base_url);
        env_str!("AUTHGATE_CLIENT_ID", self.idp.client_id);
        env_str!("AUTHGATE_REDIRECT_URI", self.idp.redirect_uri);
        env_str!("AUTHGATE_EXCHANGE_URL", self.exchange.url);
        env_str!("AUTHGATE_API_URL", self.api.data_url);
        env_path!("AUTHGATE_STORAGE_DIR", self.session.storage_dir);
        env_str!("AUTHGATE_LOG_LEVEL", self.logging.level);
    }

    /// Validate that the fields the login flow depends on are set.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.idp.base_url.is_empty() {
            anyhow::bail!("idp.base_url is not configured");
        }
        if self.idp.client_id.is_empty() {
            anyhow::bail!("idp.client_id is not configured");
        }
        if self.idp.redirect_uri.is_empty() {
            anyhow::bail!("idp.redirect_uri is not configured");
        }
        if self.exchange.url.is_empty() {
            anyhow::bail!("exchange.url is not configured");
        }
        Ok(())
    }
}
