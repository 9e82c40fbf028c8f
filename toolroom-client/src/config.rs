//! Configuration loading for the toolroom client.
//!
//! Only `api_base_url` is required; every other field has a default.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use toolroom_core::ConfigError;
use toolroom_storage::CacheConfig;

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "TOOLROOM_CONFIG";

/// Environment variable holding the base API URL when no file is given.
pub const API_URL_ENV: &str = "TOOLROOM_API_URL";

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_IDEMPOTENT_RETRIES: u32 = 1;
pub const DEFAULT_MAX_STALENESS_SECS: u64 = 15 * 60;
pub const MAX_IDEMPOTENT_RETRIES: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Extra attempts for `list`/`get` after a transport failure.
    #[serde(default = "default_idempotent_retries")]
    pub idempotent_retries: u32,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub cache: CacheSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSection {
    #[serde(default = "default_max_staleness_secs")]
    pub max_staleness_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            max_staleness_secs: DEFAULT_MAX_STALENESS_SECS,
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_idempotent_retries() -> u32 {
    DEFAULT_IDEMPOTENT_RETRIES
}

fn default_max_staleness_secs() -> u64 {
    DEFAULT_MAX_STALENESS_SECS
}

impl ClientConfig {
    /// Config for `api_base_url` with every other field defaulted.
    pub fn for_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            idempotent_retries: DEFAULT_IDEMPOTENT_RETRIES,
            bearer_token: None,
            cache: CacheSection::default(),
        }
    }

    /// Resolve from the `--config` path if given, then `TOOLROOM_CONFIG`, then
    /// `TOOLROOM_API_URL`.
    pub fn resolve(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match path.or_else(config_path_from_env) {
            Some(path) => Self::from_path(&path)?,
            None => {
                let url = std::env::var(API_URL_ENV).map_err(|_| ConfigError::MissingSource)?;
                Self::for_url(url)
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.api_base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.idempotent_retries > MAX_IDEMPOTENT_RETRIES {
            return Err(ConfigError::InvalidValue {
                field: "idempotent_retries",
                reason: format!("must be <= {}", MAX_IDEMPOTENT_RETRIES),
            });
        }
        if self.cache.max_staleness_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.max_staleness_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self
            .bearer_token
            .as_deref()
            .is_some_and(|token| token.trim().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "bearer_token",
                reason: "must not be blank when set".to_string(),
            });
        }
        Ok(())
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim().trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::default().with_max_staleness(Duration::from_secs(self.cache.max_staleness_secs))
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV).ok().map(PathBuf::from)
}
