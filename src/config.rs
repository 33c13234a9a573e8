//! Configuration loader and validator for the content job engine.
use crate::model::AiModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub generation: Generation,
    pub gateway: Gateway,
}

/// Process-level settings: storage location and scheduler cadence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

/// Defaults applied to bulk generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Generation {
    pub default_model: AiModel,
    pub max_bulk_articles: usize,
}

/// Sidecar service that fronts the AI providers, media generation,
/// publishing platforms and site verification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Gateway {
    pub base_url: String,
    pub token: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_lease_ttl_secs() -> u64 {
    300
}

fn default_timeout_secs() -> u64 {
    120
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Database URL resolution order: `DATABASE_URL`, `app.database_url`,
    /// then a SQLite file inside `app.data_dir`.
    pub fn database_url(&self) -> String {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            return url;
        }
        match &self.app.database_url {
            Some(url) if !url.trim().is_empty() => url.clone(),
            _ => format!(
                "sqlite://{}/content-jobs.db",
                self.app.data_dir.trim_end_matches('/')
            ),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.app.poll_interval_secs)
    }

    pub fn lease_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.app.lease_ttl_secs as i64)
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_secs == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_secs must be > 0"));
    }
    if cfg.app.lease_ttl_secs == 0 {
        return Err(ConfigError::Invalid("app.lease_ttl_secs must be > 0"));
    }

    if cfg.generation.max_bulk_articles == 0 {
        return Err(ConfigError::Invalid(
            "generation.max_bulk_articles must be > 0",
        ));
    }

    if cfg.gateway.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("gateway.base_url must be non-empty"));
    }
    if reqwest::Url::parse(&cfg.gateway.base_url).is_err() {
        return Err(ConfigError::Invalid("gateway.base_url must be a valid URL"));
    }
    if cfg.gateway.timeout_secs == 0 {
        return Err(ConfigError::Invalid("gateway.timeout_secs must be > 0"));
    }

    Ok(())
}

/// Reference configuration document.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_secs: 60
  lease_ttl_secs: 300

generation:
  default_model: "gpt-4o"
  max_bulk_articles: 50

gateway:
  base_url: "http://127.0.0.1:8088/"
  token: "YOUR_GATEWAY_TOKEN"
  timeout_secs: 120
"#
}
