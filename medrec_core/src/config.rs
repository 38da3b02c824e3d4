//! Configuration file support for medrec.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/medrec/config.toml`,
//! then `SECRET_KEY`, `DATABASE_URL` and `MEDREC_BIND` from the
//! environment override the file.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub records: RecordsConfig,
}

/// HTTP listener configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Database location and connection policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Total connection attempts before startup gives up
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            connect_retries: default_connect_retries(),
            retry_delay_secs: default_retry_delay_secs(),
        }
    }
}

impl DatabaseConfig {
    /// Configuration for a SQLite file at `path`, retry delay disabled
    pub fn sqlite_file(path: &Path) -> Self {
        Self {
            url: format!("sqlite://{}", path.display()),
            retry_delay_secs: 0,
            ..Self::default()
        }
    }
}

/// Credential engine configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 signing secret; empty means "not configured"
    #[serde(default)]
    pub secret_key: String,

    #[serde(default = "default_token_ttl_minutes")]
    pub token_ttl_minutes: i64,

    #[serde(default = "default_bcrypt_cost")]
    pub bcrypt_cost: u32,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            token_ttl_minutes: default_token_ttl_minutes(),
            bcrypt_cost: default_bcrypt_cost(),
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret_key", &if self.secret_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("token_ttl_minutes", &self.token_ttl_minutes)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

/// Record store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecordsConfig {
    /// Largest page size a listing will return
    #[serde(default = "default_max_page_limit")]
    pub max_page_limit: u32,
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            max_page_limit: default_max_page_limit(),
        }
    }
}

// Default value functions
fn default_bind() -> String {
    "0.0.0.0:8000".into()
}

fn default_database_url() -> String {
    let base = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
    format!("sqlite://{}", base.join("medrec").join("medrec.db").display())
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_connect_retries() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    2
}

fn default_token_ttl_minutes() -> i64 {
    30
}

fn default_bcrypt_cost() -> u32 {
    crate::credentials::DEFAULT_HASH_COST
}

fn default_max_page_limit() -> u32 {
    100
}

impl Config {
    /// Load configuration from the standard config path plus the environment
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    /// Load from `path` (or the standard path when `None`), then apply env overrides
    pub fn load_with_path(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_config_path);
        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("medrec").join("config.toml")
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("SECRET_KEY").filter(|s| !s.is_empty()) {
            self.auth.secret_key = secret;
        }
        if let Some(url) = lookup("DATABASE_URL").filter(|s| !s.is_empty()) {
            self.database.url = url;
        }
        if let Some(bind) = lookup("MEDREC_BIND").filter(|s| !s.is_empty()) {
            self.server.bind = bind;
        }
    }

    /// Reject settings no component can work with
    pub fn validate(&self) -> Result<()> {
        if self.database.connect_retries == 0 {
            return Err(Error::Config("database.connect_retries must be at least 1".into()));
        }
        if self.database.max_connections == 0 {
            return Err(Error::Config("database.max_connections must be at least 1".into()));
        }
        if self.auth.token_ttl_minutes <= 0 {
            return Err(Error::Config("auth.token_ttl_minutes must be positive".into()));
        }
        if self.records.max_page_limit == 0 {
            return Err(Error::Config("records.max_page_limit must be at least 1".into()));
        }
        Ok(())
    }

    /// The signing secret, or a configuration error when it is absent
    pub fn require_secret(&self) -> Result<&str> {
        let secret = self.auth.secret_key.trim();
        if secret.is_empty() {
            return Err(Error::Config(
                "SECRET_KEY is not set; refusing to issue tokens without a signing secret".into(),
            ));
        }
        Ok(secret)
    }
}
