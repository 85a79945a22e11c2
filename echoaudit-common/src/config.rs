//! Configuration loading
//!
//! Bootstrap configuration is a single TOML file. Resolution priority for
//! every overridable value:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing config file is not an error: defaults are used and a warning
//! is logged.

use crate::names::NameBook;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "ECHOAUDIT_CONFIG";

/// Environment variable overriding the Job Service base URL
pub const JOB_SERVICE_URL_ENV_VAR: &str = "ECHOAUDIT_JOB_SERVICE_URL";

/// Compiled default Job Service base URL
pub const DEFAULT_JOB_SERVICE_URL: &str = "http://127.0.0.1:8000";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub job_service: JobServiceConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub player: PlayerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Display name translations
    #[serde(default)]
    pub names: NameBook,
}

/// Job Service connection settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct JobServiceConfig {
    /// Base URL; `None` defers to the environment or compiled default
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Poll and wait timing
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PollingConfig {
    /// Status poll period while nothing runs
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,

    /// Status poll period while a run or any stage is active
    #[serde(default = "default_active_interval_ms")]
    pub active_interval_ms: u64,

    /// Listing refresh period
    #[serde(default = "default_index_refresh_interval_ms")]
    pub index_refresh_interval_ms: u64,

    /// How long after a trigger a stage may stay not-running before the
    /// acknowledgment alone decides the outcome
    #[serde(default = "default_start_grace_ms")]
    pub start_grace_ms: u64,
}

/// External audio player
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PlayerConfig {
    /// Program and arguments; the audio stream is written to its stdin
    #[serde(default = "default_player_command")]
    pub command: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_idle_interval_ms() -> u64 {
    2000
}

fn default_active_interval_ms() -> u64 {
    3000
}

fn default_index_refresh_interval_ms() -> u64 {
    5000
}

fn default_start_grace_ms() -> u64 {
    10_000
}

fn default_player_command() -> Vec<String> {
    ["ffplay", "-nodisp", "-autoexit", "-loglevel", "quiet", "-i", "-"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for JobServiceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            idle_interval_ms: default_idle_interval_ms(),
            active_interval_ms: default_active_interval_ms(),
            index_refresh_interval_ms: default_index_refresh_interval_ms(),
            start_grace_ms: default_start_grace_ms(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            command: default_player_command(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl JobServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

impl PollingConfig {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn active_interval(&self) -> Duration {
        Duration::from_millis(self.active_interval_ms)
    }

    pub fn index_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.index_refresh_interval_ms)
    }

    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }
}

impl TomlConfig {
    /// Reject values that would make the pipeline misbehave
    pub fn validate(&self) -> Result<()> {
        if self.polling.idle_interval_ms == 0 || self.polling.active_interval_ms == 0 {
            return Err(Error::Config("poll intervals must be greater than zero".to_string()));
        }
        if self.polling.index_refresh_interval_ms == 0 {
            return Err(Error::Config(
                "index refresh interval must be greater than zero".to_string(),
            ));
        }
        if self.player.command.is_empty() {
            return Err(Error::Config("player command must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Platform config file location: `~/.config/echoaudit/config.toml` on Linux
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("echoaudit").join("config.toml"))
}

/// Locate the config file
///
/// Returns `None` when neither an explicit path nor the platform default
/// exists; callers then run on compiled defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform default, only if present
    default_config_path().filter(|p| p.exists())
}

/// Load and validate a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.validate()?;
    debug!(path = %path.display(), "Loaded TOML config");
    Ok(config)
}

/// Resolve and load configuration, falling back to defaults when no file exists
///
/// An explicitly named file (CLI or environment) that cannot be read is an
/// error; the implicit platform default being absent is not.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    match resolve_config_path(cli_arg) {
        Some(path) => {
            let config = load_toml_config(&path)?;
            info!("Configuration loaded from {}", path.display());
            Ok(config)
        }
        None => {
            warn!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}

/// Resolve the Job Service base URL
pub fn resolve_job_service_url(cli_arg: Option<&str>, config: &TomlConfig) -> String {
    // Priority 1: Command-line argument
    if let Some(url) = cli_arg.filter(|u| !u.trim().is_empty()) {
        return url.trim().to_string();
    }

    // Priority 2: Environment variable
    if let Ok(url) = std::env::var(JOB_SERVICE_URL_ENV_VAR) {
        if !url.trim().is_empty() {
            return url.trim().to_string();
        }
    }

    // Priority 3: TOML config
    if let Some(url) = config.job_service.base_url.as_deref() {
        if !url.trim().is_empty() {
            return url.trim().to_string();
        }
    }

    // Priority 4: Compiled default
    DEFAULT_JOB_SERVICE_URL.to_string()
}

/// Write a config file atomically (temp file + rename)
///
/// Creates the parent directory if needed.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let tmp_path = path.with_extension("toml.tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;

    info!("Config written to {}", path.display());
    Ok(())
}
