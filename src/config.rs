//! Configuration loader and validator for the attendance tracker core.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
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
    pub policy: Policy,
    pub remote: Remote,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub sync_interval_seconds: u64,
    pub request_timeout_seconds: u64,
}

/// Marking-policy knobs. Deployment variants differ only in these two
/// flags, not in the state machine itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Policy {
    /// When false a single presence scan completes the day on the spot.
    pub require_double_verification: bool,
    /// When false an exit scan with no prior entry record is rejected.
    pub allow_exit_without_entry: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            require_double_verification: true,
            allow_exit_without_entry: true,
        }
    }
}

/// Remote attendance store endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Remote {
    pub base_url: String,
    pub api_key: String,
    pub teacher_id: String,
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Sqlite URL derived from the data dir unless `DATABASE_URL` overrides it.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/rollcall.db", self.app.data_dir))
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
    if cfg.app.sync_interval_seconds == 0 {
        return Err(ConfigError::Invalid("app.sync_interval_seconds must be > 0"));
    }
    if cfg.app.request_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "app.request_timeout_seconds must be > 0",
        ));
    }

    if cfg.remote.base_url.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.base_url must be non-empty"));
    }
    if cfg.remote.api_key.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.api_key must be non-empty"));
    }
    if cfg.remote.teacher_id.trim().is_empty() {
        return Err(ConfigError::Invalid("remote.teacher_id must be non-empty"));
    }

    Ok(())
}

/// Example YAML used by the docs and the config tests.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  sync_interval_seconds: 30
  request_timeout_seconds: 10

policy:
  require_double_verification: true
  allow_exit_without_entry: true

remote:
  base_url: "https://attendance.example.org"
  api_key: "YOUR_API_KEY"
  teacher_id: "teacher-1"
"#
}
