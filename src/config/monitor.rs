//! Monitor definition files (JSON).
//!
//! ```json
//! {
//!   "plugin": "kmsg",
//!   "source": "kernel-monitor",
//!   "bufferSize": 10,
//!   "restartPattern": "Initializing cgroup subsys cpuset",
//!   "conditions": [{"type": "KernelDeadlock", "reason": "KernelHasNoDeadlock", "message": "kernel has no deadlock"}],
//!   "rules": [{"type": "permanent", "condition": "KernelDeadlock", "reason": "DockerHung", "pattern": "task docker:\\w+ blocked for more than \\w+ seconds\\."}]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use super::duration::parse_duration;
use super::ConfigError;
use crate::engine::EngineConfig;
use crate::plugin::PluginSettings;
use crate::rules::{compile_anchored, Rule, RuleConfig};
use crate::source::{FileLineParser, FileSource, JournalSource, KmsgSource, LineSource};
use crate::types::ConditionDefault;

const DEFAULT_KMSG_PATH: &str = "/dev/kmsg";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Largest accepted `bufferSize`.
pub const MAX_BUFFER_SIZE: usize = 10_000;

fn default_buffer_size() -> usize {
    10
}

/// A monitor definition, tagged by its `plugin` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "plugin", rename_all = "lowercase")]
pub enum MonitorDefinition {
    /// Plain-text log file.
    Filelog(LogMonitorConfig),
    /// systemd journal.
    Journald(LogMonitorConfig),
    /// Kernel ring buffer.
    Kmsg(LogMonitorConfig),
    /// External diagnostic plugins.
    Custom(PluginMonitorConfig),
}

impl MonitorDefinition {
    /// Read and parse a definition file. Rules are not validated yet.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse a definition from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns the JSON error for malformed input.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Source name reported by the monitor.
    pub fn source(&self) -> &str {
        match self {
            Self::Filelog(c) | Self::Journald(c) | Self::Kmsg(c) => &c.source,
            Self::Custom(c) => &c.source,
        }
    }

    /// Plugin kind as written in the file.
    pub fn plugin(&self) -> &'static str {
        match self {
            Self::Filelog(_) => "filelog",
            Self::Journald(_) => "journald",
            Self::Kmsg(_) => "kmsg",
            Self::Custom(_) => "custom",
        }
    }
}

/// Settings shared by the log-based monitors.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMonitorConfig {
    /// Name reported in every status.
    pub source: String,
    /// File to tail (filelog), journal directory (journald), or device (kmsg).
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// Ignore lines older than this, e.g. `"5m"`.
    #[serde(default)]
    pub lookback: Option<String>,
    /// Match buffer capacity in lines.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Pattern that resets every condition.
    #[serde(default)]
    pub restart_pattern: Option<String>,
    /// Source-specific parsing options.
    #[serde(default)]
    pub plugin_config: LogPluginConfig,
    /// Default conditions.
    #[serde(default)]
    pub conditions: Vec<ConditionDefault>,
    /// Detection rules.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// `pluginConfig` of a log monitor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogPluginConfig {
    /// Regex whose first group is the timestamp (filelog).
    pub timestamp: Option<String>,
    /// Regex whose first group is the message (filelog).
    pub message: Option<String>,
    /// chrono format of the timestamp (filelog).
    pub timestamp_format: Option<String>,
    /// How often the file is polled (filelog).
    pub poll_interval: Option<String>,
    /// `SYSLOG_IDENTIFIER` filter (journald).
    pub identifier: Option<String>,
}

impl LogMonitorConfig {
    /// Validate rules and build the engine configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found in the conditions or rules.
    pub fn engine_config(&self) -> Result<EngineConfig, ConfigError> {
        check_defaults(&self.conditions)?;
        if self.buffer_size == 0 {
            return Err(ConfigError::NonPositive {
                field: "bufferSize",
            });
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::TooLarge {
                field: "bufferSize".to_owned(),
                value: self.buffer_size,
                max: MAX_BUFFER_SIZE,
            });
        }

        let rules = self
            .rules
            .iter()
            .map(|r| Rule::from_log_config(r, &self.conditions))
            .collect::<Result<Vec<_>, _>>()?;

        let restart_pattern = self
            .restart_pattern
            .as_deref()
            .map(compile_anchored)
            .transpose()
            .map_err(|source| ConfigError::InvalidRegex {
                field: "restartPattern",
                source,
            })?;

        Ok(EngineConfig {
            source: self.source.clone(),
            buffer_size: self.buffer_size,
            defaults: self.conditions.clone(),
            rules,
            restart_pattern,
            message_change_updates: false,
        })
    }

    /// Parsed `lookback`, if set.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDuration`] for an unparseable value.
    pub fn lookback(&self) -> Result<Option<Duration>, ConfigError> {
        self.lookback
            .as_deref()
            .map(|raw| duration_setting("lookback", raw))
            .transpose()
    }

    /// Build a tailing source for a `filelog` monitor.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when `logPath` or a parsing setting is
    /// missing or invalid.
    pub fn file_source(&self) -> Result<LineSource, ConfigError> {
        const PLUGIN: &str = "filelog";
        let path = self.log_path.clone().ok_or(ConfigError::MissingSetting {
            field: "logPath",
            plugin: PLUGIN,
        })?;
        let pc = &self.plugin_config;
        let timestamp = pc.timestamp.as_deref().ok_or(ConfigError::MissingSetting {
            field: "pluginConfig.timestamp",
            plugin: PLUGIN,
        })?;
        let message = pc.message.as_deref().ok_or(ConfigError::MissingSetting {
            field: "pluginConfig.message",
            plugin: PLUGIN,
        })?;
        let format = pc.timestamp_format.as_deref().ok_or(ConfigError::MissingSetting {
            field: "pluginConfig.timestampFormat",
            plugin: PLUGIN,
        })?;

        let parser = FileLineParser::new(timestamp, message, format).map_err(|source| {
            ConfigError::InvalidRegex {
                field: "pluginConfig.timestamp/message",
                source,
            }
        })?;
        let poll_interval = match pc.poll_interval.as_deref() {
            Some(raw) => positive_duration("pluginConfig.pollInterval", raw)?,
            None => DEFAULT_POLL_INTERVAL,
        };

        Ok(LineSource::File(FileSource::new(
            path,
            parser,
            poll_interval,
            self.lookback()?,
        )))
    }

    /// Build a journal source for a `journald` monitor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDuration`] for a bad `lookback`.
    pub fn journal_source(&self) -> Result<LineSource, ConfigError> {
        Ok(LineSource::Journal(JournalSource::new(
            self.log_path.clone(),
            self.plugin_config.identifier.clone(),
            self.lookback()?,
        )))
    }

    /// Build a kernel log source for a `kmsg` monitor.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidDuration`] for a bad `lookback`.
    pub fn kmsg_source(&self) -> Result<LineSource, ConfigError> {
        let path = self
            .log_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_KMSG_PATH));
        Ok(LineSource::Kmsg(KmsgSource::new(path, self.lookback()?)))
    }
}

/// Settings of a `custom` plugin monitor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginMonitorConfig {
    /// Name reported in every status.
    pub source: String,
    /// Executor settings.
    #[serde(default)]
    pub plugin_config: CustomPluginConfig,
    /// Default conditions.
    #[serde(default)]
    pub conditions: Vec<ConditionDefault>,
    /// Plugin rules.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

/// `pluginConfig` of a custom plugin monitor. Unset fields take the
/// [`PluginSettings`] defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomPluginConfig {
    /// Time between cycles, e.g. `"30s"`.
    pub invoke_interval: Option<String>,
    /// Global per-run timeout, e.g. `"5s"`.
    pub timeout: Option<String>,
    /// Maximum plugins running at once.
    pub concurrency: Option<usize>,
    /// Maximum result message length in bytes.
    pub max_output_length: Option<usize>,
    /// Also update a True condition when only its message changed.
    #[serde(default)]
    pub enable_message_change_based_condition_update: bool,
}

impl PluginMonitorConfig {
    /// Resolve executor settings.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unparseable or non-positive values.
    pub fn settings(&self) -> Result<PluginSettings, ConfigError> {
        let pc = &self.plugin_config;
        let mut settings = PluginSettings::default();

        if let Some(raw) = pc.invoke_interval.as_deref() {
            settings.invoke_interval = positive_duration("pluginConfig.invokeInterval", raw)?;
        }
        if let Some(raw) = pc.timeout.as_deref() {
            settings.timeout = positive_duration("pluginConfig.timeout", raw)?;
        }
        if let Some(n) = pc.concurrency {
            if n == 0 {
                return Err(ConfigError::NonPositive {
                    field: "pluginConfig.concurrency",
                });
            }
            settings.concurrency = n;
        }
        if let Some(n) = pc.max_output_length {
            if n == 0 {
                return Err(ConfigError::NonPositive {
                    field: "pluginConfig.maxOutputLength",
                });
            }
            settings.max_output_length = n;
        }
        Ok(settings)
    }

    /// Validate every rule against `settings`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found in the conditions or rules.
    pub fn rules(&self, settings: &PluginSettings) -> Result<Vec<Arc<Rule>>, ConfigError> {
        check_defaults(&self.conditions)?;
        self.rules
            .iter()
            .map(|r| Rule::from_plugin_config(r, &self.conditions, settings.timeout).map(Arc::new))
            .collect()
    }

    /// Engine configuration for plugin results (no log rules, no buffer use).
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::new(self.source.clone(), self.conditions.clone());
        config.message_change_updates = self.plugin_config.enable_message_change_based_condition_update;
        config
    }
}

fn check_defaults(defaults: &[ConditionDefault]) -> Result<(), ConfigError> {
    for (i, default) in defaults.iter().enumerate() {
        let duplicated = defaults
            .iter()
            .skip(i.saturating_add(1))
            .any(|d| d.condition_type == default.condition_type);
        if duplicated {
            return Err(ConfigError::DuplicateCondition(default.condition_type.clone()));
        }
    }
    Ok(())
}

fn duration_setting(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
        field: field.to_owned(),
        value: raw.to_owned(),
    })
}

fn positive_duration(field: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let value = duration_setting(field, raw)?;
    if value.is_zero() {
        return Err(ConfigError::NonPositive { field });
    }
    Ok(value)
}
