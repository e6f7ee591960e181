//! Configuration loading, validation, and management for Moldeo.
//!
//! Loads configuration from `~/.moldeo/config.toml` with environment
//! variable overrides. Validates all settings before an engine is built.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use moldeo_core::schema::{DEFAULT_MAX_DEPTH, EvalOptions, UnknownKeyPolicy};
use serde::{Deserialize, Serialize};

/// The root configuration structure.
///
/// Maps directly to `~/.moldeo/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path segment separator
    #[serde(default = "default_separator")]
    pub separator: String,

    /// What to do with schema keys outside the vocabulary
    #[serde(default)]
    pub unknown_keys: UnknownKeyPolicy,

    /// How top-level evaluation failures reach the caller
    #[serde(default)]
    pub error_policy: ErrorPolicy,

    /// Maximum schema nesting depth
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// Fetch collaborator configuration
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_separator() -> String {
    ".".into()
}
fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

/// Top-level failure policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Return the error to the caller.
    #[default]
    Propagate,
    /// Log the error and yield `null`. Cancellation is still returned.
    Swallow,
}

impl std::str::FromStr for ErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "propagate" => Ok(ErrorPolicy::Propagate),
            "swallow" => Ok(ErrorPolicy::Swallow),
            other => Err(ConfigError::ValidationError(format!(
                "unknown error policy '{other}' (expected 'propagate' or 'swallow')"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Base URL prepended to relative request URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Headers sent with every request
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!("moldeo/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            base_url: None,
            user_agent: default_user_agent(),
            headers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            unknown_keys: UnknownKeyPolicy::default(),
            error_policy: ErrorPolicy::default(),
            max_depth: default_max_depth(),
            fetch: FetchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.moldeo/config.toml).
    ///
    /// Environment variables override file values:
    /// - `MOLDEO_SEPARATOR`
    /// - `MOLDEO_ERROR_POLICY` (`propagate` | `swallow`)
    /// - `MOLDEO_FETCH_BASE_URL`
    /// - `MOLDEO_LOG_FORMAT` (`pretty` | `json`)
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        Self::load_with_env(&config_path)
    }

    /// Load a specific file, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable source (the process environment in
    /// production, a map in tests).
    pub fn apply_env_overrides<F>(&mut self, var: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(separator) = var("MOLDEO_SEPARATOR") {
            self.separator = separator;
        }
        if let Some(policy) = var("MOLDEO_ERROR_POLICY") {
            self.error_policy = policy.parse()?;
        }
        if let Some(base_url) = var("MOLDEO_FETCH_BASE_URL") {
            self.fetch.base_url = Some(base_url);
        }
        if let Some(format) = var("MOLDEO_LOG_FORMAT") {
            self.logging.format = match format.trim().to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "unknown log format '{other}'"
                    )));
                }
            };
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".moldeo")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.separator.is_empty() {
            return Err(ConfigError::ValidationError(
                "separator cannot be empty".into(),
            ));
        }

        if self.max_depth == 0 {
            return Err(ConfigError::ValidationError(
                "max_depth must be > 0".into(),
            ));
        }

        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "fetch.timeout_secs must be > 0".into(),
            ));
        }

        if let Some(base_url) = &self.fetch.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(ConfigError::ValidationError(
                    "fetch.base_url must start with http:// or https://".into(),
                ));
            }
        }

        Ok(())
    }

    /// Evaluation options handed to every context.
    pub fn eval_options(&self) -> EvalOptions {
        EvalOptions {
            unknown_keys: self.unknown_keys,
            max_depth: self.max_depth,
        }
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for moldeo_core::Error {
    fn from(err: ConfigError) -> Self {
        moldeo_core::Error::Config {
            message: err.to_string(),
        }
    }
}
