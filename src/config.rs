//! Configuration loader and validator for the paddock sync engine.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::generator::DEFAULT_DAILY_CONSUMPTION_HA;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("config is not valid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// `config.yaml` as deserialized. `generator` may be omitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub sync: SyncSettings,
    #[serde(default)]
    pub generator: Generator,
}

/// Local state and identity of the farm being edited.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    /// Directory holding the local snapshot cache.
    pub data_dir: String,
    pub farm_id: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sqlite,
    Http,
}

/// Persistence backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    pub backend: Backend,
    pub timeout_ms: u64,
    /// Required for the `sqlite` backend.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Required for the `http` backend.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Generator {
    pub daily_consumption_ha: f64,
}

impl Default for Generator {
    fn default() -> Self {
        Self {
            daily_consumption_ha: DEFAULT_DAILY_CONSUMPTION_HA,
        }
    }
}

impl Config {
    /// Create the snapshot directory if it does not exist yet.
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.app.data_dir)
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync.timeout_ms)
    }
}

/// Read, parse and validate a config file (`./config.yaml` when `path` is `None`).
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

/// Reject configs the CLI could not run with, e.g. a backend without its URL.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.farm_id.trim().is_empty() {
        return Err(ConfigError::Invalid("app.farm_id must be non-empty"));
    }
    if cfg.sync.timeout_ms == 0 {
        return Err(ConfigError::Invalid("sync.timeout_ms must be > 0"));
    }

    match cfg.sync.backend {
        Backend::Sqlite => {
            if is_blank(&cfg.sync.database_url) {
                return Err(ConfigError::Invalid(
                    "sync.database_url is required for the sqlite backend",
                ));
            }
        }
        Backend::Http => {
            if is_blank(&cfg.sync.base_url) {
                return Err(ConfigError::Invalid("sync.base_url is required for the http backend"));
            }
            if is_blank(&cfg.sync.token) {
                return Err(ConfigError::Invalid("sync.token is required for the http backend"));
            }
        }
    }

    let daily = cfg.generator.daily_consumption_ha;
    if !(daily.is_finite() && daily > 0.0) {
        return Err(ConfigError::Invalid("generator.daily_consumption_ha must be > 0"));
    }

    Ok(())
}

/// A complete, valid example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  farm_id: "demo-farm"

sync:
  backend: sqlite
  timeout_ms: 10000
  database_url: "sqlite://./data/remote.db"
  # For the http backend:
  # base_url: "https://sync.example.com/api"
  # token: "YOUR_SYNC_TOKEN"

generator:
  daily_consumption_ha: 3.5
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync.backend, Backend::Sqlite);
        assert_eq!(cfg.sync_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn generator_section_is_optional() {
        let yaml = example().split("generator:").next().unwrap();
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.generator.daily_consumption_ha, DEFAULT_DAILY_CONSUMPTION_HA);
    }

    #[test]
    fn invalid_app_fields() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.farm_id = " ".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("app.farm_id")),
            _ => panic!("wrong error"),
        }

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.timeout_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn backend_requirements() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.database_url = None;
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("database_url")),
            _ => panic!("wrong error"),
        }

        cfg.sync.backend = Backend::Http;
        cfg.sync.base_url = Some("https://sync.example.com".into());
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("sync.token")),
            _ => panic!("wrong error"),
        }

        cfg.sync.token = Some("t".into());
        validate(&cfg).unwrap();
    }

    #[test]
    fn invalid_daily_consumption() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.generator.daily_consumption_ha = 0.0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unknown_backend_is_a_parse_error() {
        let yaml = example().replace("backend: sqlite", "backend: carrier-pigeon");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.farm_id, "demo-farm");
        assert!(matches!(
            load(Some(&td.path().join("missing.yaml"))),
            Err(ConfigError::Io(_))
        ));
    }
}
