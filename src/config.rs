//! Configuration loader and validator for the offline sync agent.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use url::Url;

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
    pub upstream: Upstream,
    pub cache: Cache,
    pub sync: Sync,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub poll_interval_ms: u64,
}

/// Remote endpoint the agent proxies to and delivers updates to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upstream {
    pub base_url: String,
    pub update_path: String,
}

/// Response cache settings. `container` is the version tag: bumping it on
/// deploy invalidates every previously cached asset at activation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Cache {
    pub container: String,
    pub offline_path: String,
    pub static_assets: Vec<String>,
}

/// Background-sync settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sync {
    pub tag: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Parsed upstream origin.
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.upstream.base_url)
            .map_err(|_| ConfigError::Invalid("upstream.base_url must be a valid URL"))
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
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    if cfg.upstream.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("upstream.base_url must be non-empty"));
    }
    if Url::parse(&cfg.upstream.base_url).is_err() {
        return Err(ConfigError::Invalid("upstream.base_url must be a valid URL"));
    }
    if !cfg.upstream.update_path.starts_with('/') {
        return Err(ConfigError::Invalid(
            "upstream.update_path must start with '/'",
        ));
    }

    if cfg.cache.container.trim().is_empty() {
        return Err(ConfigError::Invalid("cache.container must be non-empty"));
    }
    if !cfg.cache.offline_path.starts_with('/') {
        return Err(ConfigError::Invalid(
            "cache.offline_path must start with '/'",
        ));
    }
    if cfg.cache.static_assets.is_empty() {
        return Err(ConfigError::Invalid("cache.static_assets must be non-empty"));
    }
    if cfg.cache.static_assets.iter().any(|a| !a.starts_with('/')) {
        return Err(ConfigError::Invalid(
            "cache.static_assets entries must start with '/'",
        ));
    }

    if cfg.sync.tag.trim().is_empty() {
        return Err(ConfigError::Invalid("sync.tag must be non-empty"));
    }

    Ok(())
}

/// Example YAML shipped with the agent; mirrors the app-shell manifest of
/// the reading tracker it fronts.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 500

upstream:
  base_url: "http://localhost:5173"
  update_path: "/api/reading-updates"

cache:
  container: "booktracker-v1"
  offline_path: "/offline.html"
  static_assets:
    - "/"
    - "/index.html"
    - "/manifest.json"
    - "/vite.svg"
    - "/icons/icon-512x512.png"

sync:
  tag: "reading-updates-sync"
"#
}
