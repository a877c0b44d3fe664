//! Client configuration: defaults, a TOML file, then environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::gateway::Tier;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub tier: Tier,
    pub api_key: Option<String>,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            tier: Tier::Free,
            api_key: None,
            timeout: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    base_url: Option<String>,
    tier: Option<String>,
    api_key: Option<String>,
    timeout_seconds: Option<u64>,
}

impl ClientConfig {
    /// Defaults overridden by `AIRQ_API_URL`, `AIRQ_PLAN`, `AIRQ_API_KEY` and
    /// `AIRQ_TIMEOUT_SECONDS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(raw)?;
        let mut cfg = Self::default();
        if let Some(url) = file.base_url {
            cfg.base_url = url;
        }
        if let Some(tier) = file.tier {
            cfg.tier = Tier::parse(&tier);
        }
        cfg.api_key = file.api_key.filter(|k| !k.is_empty());
        cfg.timeout = file
            .timeout_seconds
            .filter(|s| *s > 0)
            .map(Duration::from_secs);
        Ok(cfg)
    }

    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("AIRQ_API_URL") {
            self.base_url = url;
        }
        if let Some(tier) = get("AIRQ_PLAN") {
            self.tier = Tier::parse(&tier);
        }
        if let Some(key) = get("AIRQ_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(raw) = get("AIRQ_TIMEOUT_SECONDS") {
            let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "AIRQ_TIMEOUT_SECONDS",
                value: raw.clone(),
            })?;
            self.timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        Ok(self)
    }
}
