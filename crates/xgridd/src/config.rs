//! Controller configuration file.
//!
//! ```toml
//! [server]
//! port = 8085
//! data_dir = "/var/lib/xgrid"
//!
//! [security]
//! registration_secret = "..."
//! admin_token = "..."
//!
//! [health]
//! interval_secs = 30
//! timeout_secs = 10
//! stats_port = 8081
//!
//! [rate_limit]
//! per_minute = 60
//! burst = 30
//! ```
//!
//! `XGRID_REGISTRATION_SECRET` and `XGRID_ADMIN_TOKEN` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const REGISTRATION_SECRET_ENV: &str = "XGRID_REGISTRATION_SECRET";
pub const ADMIN_TOKEN_ENV: &str = "XGRID_ADMIN_TOKEN";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("security.registration_secret is required")]
    MissingRegistrationSecret,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub server: ServerSection,
    pub security: SecuritySection,
    pub health: HealthSection,
    pub rate_limit: RateLimitSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
    pub data_dir: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: 8085,
            data_dir: PathBuf::from("/var/lib/xgrid"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SecuritySection {
    pub registration_secret: String,
    pub admin_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthSection {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    /// Port of the proxy engine's stats endpoint on every node.
    pub stats_port: u16,
}

impl Default for HealthSection {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 10,
            stats_port: 8081,
        }
    }
}

impl HealthSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            per_minute: 60,
            burst: 30,
        }
    }
}

impl MasterConfig {
    /// Read the file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&raw)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Override secrets from the environment. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secret) = lookup(REGISTRATION_SECRET_ENV).filter(|v| !v.is_empty()) {
            self.security.registration_secret = secret;
        }
        if let Some(token) = lookup(ADMIN_TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.security.admin_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.registration_secret.trim().is_empty() {
            return Err(ConfigError::MissingRegistrationSecret);
        }
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.server.data_dir.join("xgrid.redb")
    }
}
