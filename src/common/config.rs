//! Configuration file handling

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};
use crate::tool::{Classifier, RetryPolicy};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Provisioning tool settings
    #[serde(default)]
    pub tool: ToolConfig,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Transient failure patterns (regex -> description).
    /// Replaces the built-in table when present.
    #[serde(default)]
    pub retryable_errors: Option<BTreeMap<String, String>>,

    /// Suite execution settings
    #[serde(default)]
    pub suite: SuiteConfig,
}

/// Provisioning tool settings
#[derive(Debug, Deserialize)]
pub struct ToolConfig {
    /// Binary name (looked up on PATH) or path
    #[serde(default = "default_binary")]
    pub binary: String,

    /// Exit code for "plan succeeded with pending changes"
    #[serde(default = "default_changes_exit_code")]
    pub plan_changes_exit_code: i32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            plan_changes_exit_code: default_changes_exit_code(),
        }
    }
}

fn default_binary() -> String {
    "terraform".to_string()
}

fn default_changes_exit_code() -> i32 {
    2
}

impl ToolConfig {
    /// Resolve the tool binary
    ///
    /// Anything that looks like a path is used as-is; bare names are
    /// searched on PATH.
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        let candidate = Path::new(&self.binary);
        if candidate.components().count() > 1 {
            if candidate.exists() {
                return Ok(candidate.to_path_buf());
            }
            return Err(Error::ToolNotFound {
                name: self.binary.clone(),
            });
        }

        which::which(&self.binary).map_err(|_| Error::ToolNotFound {
            name: self.binary.clone(),
        })
    }
}

/// Retry settings, in milliseconds
#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per invocation, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_delay() -> u64 {
    5_000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_multiplier() -> f64 {
    2.0
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_multiplier: config.backoff_multiplier.max(1.0),
        }
    }
}

/// Suite execution settings
#[derive(Debug, Deserialize)]
pub struct SuiteConfig {
    /// Scenarios run in parallel
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Cancel the suite after this many seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            jobs: default_jobs(),
            timeout_secs: None,
        }
    }
}

fn default_jobs() -> usize {
    4
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Without one, the default config file is
    /// used if present, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Parse a config file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Retry policy derived from `[retry]`
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Base classifier: the configured table, or the built-in one
    pub fn classifier(&self) -> Result<Classifier> {
        match &self.retryable_errors {
            Some(table) => Classifier::new(table.iter()),
            None => Ok(Classifier::with_defaults()),
        }
    }
}
