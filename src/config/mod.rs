//! Configuration loading and validation.
//!
//! Two layers:
//! - the daemon file (TOML), naming monitor definition files and exporter
//!   settings. Environment variables override file values; file values
//!   override defaults.
//! - monitor definitions (JSON, see [`monitor`]), validated once at load so
//!   evaluation never fails on bad configuration.

pub mod duration;
pub mod monitor;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub use self::monitor::{
    CustomPluginConfig, LogMonitorConfig, LogPluginConfig, MonitorDefinition, PluginMonitorConfig,
};

/// Every way a configuration can be rejected.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A definition file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A definition file is not valid JSON for its schema.
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// A rule pattern does not compile.
    #[error("rule '{reason}': invalid pattern: {source}")]
    InvalidPattern {
        /// Reason of the offending rule.
        reason: String,
        /// Regex compilation error.
        source: regex::Error,
    },

    /// A log rule has no pattern.
    #[error("rule '{reason}': pattern is required")]
    MissingPattern {
        /// Reason of the offending rule.
        reason: String,
    },

    /// A permanent rule names a condition with no declared default.
    #[error("rule '{reason}': condition '{condition}' is not declared")]
    UnknownCondition {
        /// Reason of the offending rule.
        reason: String,
        /// Undeclared condition type.
        condition: String,
    },

    /// Two default conditions share a type.
    #[error("condition '{0}' is declared more than once")]
    DuplicateCondition(String),

    /// Two monitors report under the same source name.
    #[error("monitor source '{0}' is defined more than once")]
    DuplicateSource(String),

    /// `countThreshold` is not a non-negative integer.
    #[error("rule '{reason}': invalid countThreshold '{value}'")]
    InvalidThreshold {
        /// Reason of the offending rule.
        reason: String,
        /// Raw value.
        value: String,
    },

    /// A duration string could not be parsed.
    #[error("{field}: invalid duration '{value}'")]
    InvalidDuration {
        /// Field description.
        field: String,
        /// Raw value.
        value: String,
    },

    /// A threshold above one was given without a window.
    #[error("rule '{reason}': countThreshold {threshold} requires a positive expirePeriod")]
    MissingExpirePeriod {
        /// Reason of the offending rule.
        reason: String,
        /// Configured threshold.
        threshold: usize,
    },

    /// A plugin rule has no executable path.
    #[error("rule '{reason}': path is required")]
    MissingPluginPath {
        /// Reason of the offending rule.
        reason: String,
    },

    /// A plugin executable does not exist.
    #[error("rule '{reason}': plugin {} does not exist", .path.display())]
    PluginNotFound {
        /// Reason of the offending rule.
        reason: String,
        /// Configured path.
        path: PathBuf,
    },

    /// A plugin rule carries rate-gate settings, which only log rules honour.
    #[error("rule '{reason}': countThreshold and expirePeriod are only supported on log rules")]
    GateOnPluginRule {
        /// Reason of the offending rule.
        reason: String,
    },

    /// A per-rule timeout is longer than the global timeout.
    #[error("rule '{reason}': timeout {rule:?} exceeds global timeout {global:?}")]
    TimeoutExceedsGlobal {
        /// Reason of the offending rule.
        reason: String,
        /// Per-rule timeout.
        rule: Duration,
        /// Global timeout.
        global: Duration,
    },

    /// A numeric or duration setting must be greater than zero.
    #[error("{field} must be positive")]
    NonPositive {
        /// Setting name.
        field: &'static str,
    },

    /// A numeric setting exceeds its upper bound.
    #[error("{field} {value} exceeds the maximum of {max}")]
    TooLarge {
        /// Setting description.
        field: String,
        /// Configured value.
        value: usize,
        /// Largest accepted value.
        max: usize,
    },

    /// A setting required by the selected plugin is absent.
    #[error("{field} is required for {plugin} monitors")]
    MissingSetting {
        /// Setting name.
        field: &'static str,
        /// Monitor plugin kind.
        plugin: &'static str,
    },

    /// A setting regex does not compile.
    #[error("{field}: invalid regex: {source}")]
    InvalidRegex {
        /// Setting name.
        field: &'static str,
        /// Regex compilation error.
        source: regex::Error,
    },
}

/// Top-level daemon configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Monitor definition files (`[monitors]`).
    pub monitors: MonitorsConfig,
    /// Status queue and exporters (`[exporter]`).
    pub exporter: ExporterConfig,
    /// Log output (`[logging]`).
    pub logging: LoggingConfig,
}

impl DaemonConfig {
    /// Load from `path` with precedence: env vars > TOML file > defaults.
    ///
    /// A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::load_from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    /// Parse a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: DaemonConfig = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Apply environment variable overrides using `env` as the resolver.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("NODEWATCH_STATUS_FILE") {
            self.exporter.status_file = Some(PathBuf::from(v));
        }
        if let Some(v) = env("NODEWATCH_LOG_DIR") {
            self.logging.dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("NODEWATCH_QUEUE_CAPACITY") {
            match v.parse::<usize>() {
                Ok(n) if n > 0 => self.exporter.queue_capacity = n,
                _ => tracing::warn!(
                    var = "NODEWATCH_QUEUE_CAPACITY",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Load and build every configured monitor.
    ///
    /// Relative definition paths are resolved against `base`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] encountered, or
    /// [`ConfigError::DuplicateSource`] if two monitors share a source name.
    pub fn load_definitions(&self, base: &Path) -> Result<Vec<MonitorDefinition>, ConfigError> {
        let mut definitions: Vec<MonitorDefinition> = Vec::with_capacity(self.monitors.configs.len());
        for path in &self.monitors.configs {
            let path = if path.is_relative() {
                base.join(path)
            } else {
                path.clone()
            };
            let definition = MonitorDefinition::load(&path)?;
            if definitions.iter().any(|d| d.source() == definition.source()) {
                return Err(ConfigError::DuplicateSource(definition.source().to_owned()));
            }
            definitions.push(definition);
        }
        Ok(definitions)
    }
}

/// `[monitors]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorsConfig {
    /// Paths of monitor definition JSON files.
    pub configs: Vec<PathBuf>,
}

/// `[exporter]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Where to write the JSON health snapshot, if anywhere.
    pub status_file: Option<PathBuf>,
    /// Capacity of the status queue shared by all monitors.
    pub queue_capacity: usize,
    /// Recent events retained in the health table.
    pub max_events: usize,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            status_file: None,
            queue_capacity: 100,
            max_events: 100,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory for rotated JSON logs; stderr only when unset.
    pub dir: Option<PathBuf>,
}
