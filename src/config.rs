//! Configuration loader and validator for the ATS sync service.
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

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub workable: Workable,
    #[serde(default)]
    pub sync: SyncSettings,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Remote ATS API settings. Credentials live on the organization row, not here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workable {
    /// Base URL template; `{subdomain}` is replaced per organization.
    pub api_base: String,
    pub throttle_ms: u64,
    pub rate_limit_cooldown_ms: u64,
    pub page_limit: u32,
    pub job_states: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for Workable {
    fn default() -> Self {
        Self {
            api_base: "https://{subdomain}.workable.com/spi/v3/".into(),
            throttle_ms: 1100,
            rate_limit_cooldown_ms: 10_000,
            page_limit: 100,
            job_states: vec!["published".into(), "open".into(), "draft".into()],
            timeout_secs: 30,
        }
    }
}

/// Orchestrator and scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSettings {
    pub checkpoint_every: u32,
    pub candidate_max_pages: Option<u32>,
    pub fetch_ratings: bool,
    pub schedule_interval_secs: u64,
    /// A `running` run whose ledger row has not been touched for this long is
    /// considered abandoned by its process and may be failed.
    #[serde(default = "default_stale_run_secs")]
    pub stale_run_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            checkpoint_every: 50,
            candidate_max_pages: None,
            fetch_ratings: true,
            schedule_interval_secs: 3600,
            stale_run_secs: default_stale_run_secs(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_stale_run_secs() -> u64 {
    1800
}

/// Upper bound for the second-based intervals; keeps them in range for
/// timestamp arithmetic.
pub const MAX_INTERVAL_SECS: u64 = 30 * 24 * 3600;

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// `DATABASE_URL` wins over the file-backed default under `data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/ats_sync.db", self.app.data_dir))
    }
}

impl Workable {
    pub fn base_url_for(&self, subdomain: &str) -> String {
        self.api_base.replace("{subdomain}", subdomain.trim())
    }

    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.rate_limit_cooldown_ms)
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
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.poll_interval_ms must be > 0"));
    }

    if !cfg.workable.api_base.contains("{subdomain}") {
        return Err(ConfigError::Invalid(
            "workable.api_base must contain a {subdomain} placeholder",
        ));
    }
    if !cfg.workable.api_base.ends_with('/') {
        return Err(ConfigError::Invalid("workable.api_base must end with '/'"));
    }
    if cfg.workable.page_limit == 0 {
        return Err(ConfigError::Invalid("workable.page_limit must be > 0"));
    }
    if cfg.workable.job_states.is_empty() {
        return Err(ConfigError::Invalid("workable.job_states must list at least one state"));
    }
    if cfg.workable.job_states.iter().any(|s| s.trim().is_empty()) {
        return Err(ConfigError::Invalid("workable.job_states entries must be non-empty"));
    }
    if cfg.workable.timeout_secs == 0 {
        return Err(ConfigError::Invalid("workable.timeout_secs must be > 0"));
    }

    if cfg.sync.checkpoint_every == 0 {
        return Err(ConfigError::Invalid("sync.checkpoint_every must be > 0"));
    }
    if cfg.sync.candidate_max_pages == Some(0) {
        return Err(ConfigError::Invalid("sync.candidate_max_pages must be > 0 when set"));
    }
    if cfg.sync.schedule_interval_secs == 0 || cfg.sync.schedule_interval_secs > MAX_INTERVAL_SECS {
        return Err(ConfigError::Invalid(
            "sync.schedule_interval_secs must be between 1 and 2592000",
        ));
    }
    if cfg.sync.stale_run_secs == 0 || cfg.sync.stale_run_secs > MAX_INTERVAL_SECS {
        return Err(ConfigError::Invalid("sync.stale_run_secs must be between 1 and 2592000"));
    }

    Ok(())
}

/// Returns the example YAML content shipped with the service.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_interval_ms: 1000

workable:
  api_base: "https://{subdomain}.workable.com/spi/v3/"
  throttle_ms: 1100
  rate_limit_cooldown_ms: 10000
  page_limit: 100
  job_states: ["published", "open", "draft"]
  timeout_secs: 30

sync:
  checkpoint_every: 50
  candidate_max_pages: null
  fetch_ratings: true
  schedule_interval_secs: 3600
  stale_run_secs: 1800
"#
}
