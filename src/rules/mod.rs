//! Detection rules: configuration schema and validated form.
//!
//! A [`RuleConfig`] is what a monitor definition file declares. It is turned
//! into an immutable [`Rule`] once at load time; every check that can fail
//! (pattern compilation, condition lookup, threshold and duration parsing,
//! plugin path existence) happens there so evaluation itself never fails.

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::duration::parse_duration;
use crate::config::ConfigError;
use crate::types::ConditionDefault;

/// Largest accepted `countThreshold`.
pub const MAX_COUNT_THRESHOLD: usize = 1_000;

/// Whether a rule produces events only or drives a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Produces events, never touches conditions.
    Temporary,
    /// Sets its named condition to True.
    Permanent,
}

/// A rule as declared in a monitor definition file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleConfig {
    /// `temporary` or `permanent`.
    #[serde(rename = "type")]
    pub kind: RuleKind,

    /// Condition type driven by a permanent rule.
    #[serde(default)]
    pub condition: String,

    /// Reason reported when the rule fires.
    pub reason: String,

    /// Regular expression matched against the tail of the log buffer.
    #[serde(default)]
    pub pattern: Option<String>,

    /// Number of matches required within `expire_period` before firing.
    #[serde(default)]
    pub count_threshold: Option<String>,

    /// Trailing window for `count_threshold`, e.g. `"10m"`.
    #[serde(default)]
    pub expire_period: Option<String>,

    /// Plugin executable (custom plugin monitors only).
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Plugin arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Per-rule plugin timeout, capped by the global timeout.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Rate gate parameters: `threshold` matches within `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debounce {
    /// Matches required inside the window.
    pub threshold: usize,
    /// Window length.
    pub period: Duration,
}

/// External command run by a plugin rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginCommand {
    /// Executable path.
    pub path: PathBuf,
    /// Arguments passed verbatim.
    pub args: Vec<String>,
    /// Optional per-rule timeout.
    pub timeout: Option<Duration>,
}

impl PluginCommand {
    /// Effective timeout for one run: the per-rule timeout capped by `global`.
    pub fn effective_timeout(&self, global: Duration) -> Duration {
        self.timeout.map_or(global, |t| t.min(global))
    }
}

/// A validated, immutable detection rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Temporary or permanent.
    pub kind: RuleKind,
    /// Condition type (meaningful for permanent rules only).
    pub condition: String,
    /// Reason reported when the rule fires.
    pub reason: String,
    /// End-anchored pattern (log rules).
    pub pattern: Option<Regex>,
    /// Optional rate gate.
    pub debounce: Option<Debounce>,
    /// Command to run (plugin rules).
    pub command: Option<PluginCommand>,
}

impl Rule {
    /// Create a bare rule with no pattern, gate, or command.
    pub fn new(kind: RuleKind, condition: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            condition: condition.into(),
            reason: reason.into(),
            pattern: None,
            debounce: None,
            command: None,
        }
    }

    /// Attach a pattern, anchoring it to the end of the buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidPattern`] if the pattern does not compile.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, ConfigError> {
        let regex = compile_anchored(pattern).map_err(|source| ConfigError::InvalidPattern {
            reason: self.reason.clone(),
            source,
        })?;
        self.pattern = Some(regex);
        Ok(self)
    }

    /// Attach a rate gate.
    pub fn with_debounce(mut self, threshold: usize, period: Duration) -> Self {
        self.debounce = Some(Debounce { threshold, period });
        self
    }

    /// Attach a plugin command.
    pub fn with_command(mut self, command: PluginCommand) -> Self {
        self.command = Some(command);
        self
    }

    /// Validate a log-monitor rule.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the pattern is missing or invalid, the
    /// condition is undeclared, or the threshold/period are out of bounds.
    pub fn from_log_config(
        config: &RuleConfig,
        defaults: &[ConditionDefault],
    ) -> Result<Self, ConfigError> {
        let pattern = config
            .pattern
            .as_deref()
            .ok_or_else(|| ConfigError::MissingPattern {
                reason: config.reason.clone(),
            })?;

        let mut rule = Self::new(config.kind, config.condition.clone(), config.reason.clone())
            .with_pattern(pattern)?;
        rule.check_condition(defaults)?;
        rule.debounce = parse_debounce(config)?;
        Ok(rule)
    }

    /// Validate a custom-plugin rule against the global timeout.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the path is missing or does not exist,
    /// the rule carries rate-gate settings, the condition is undeclared, or
    /// the per-rule timeout is invalid or exceeds `global_timeout`.
    pub fn from_plugin_config(
        config: &RuleConfig,
        defaults: &[ConditionDefault],
        global_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let path = config
            .path
            .clone()
            .ok_or_else(|| ConfigError::MissingPluginPath {
                reason: config.reason.clone(),
            })?;

        if config.count_threshold.is_some() || config.expire_period.is_some() {
            return Err(ConfigError::GateOnPluginRule {
                reason: config.reason.clone(),
            });
        }

        if !path.exists() {
            return Err(ConfigError::PluginNotFound {
                reason: config.reason.clone(),
                path,
            });
        }

        let timeout = match config.timeout.as_deref() {
            Some(raw) => {
                let t = parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
                    field: format!("rule '{}' timeout", config.reason),
                    value: raw.to_owned(),
                })?;
                if t > global_timeout {
                    return Err(ConfigError::TimeoutExceedsGlobal {
                        reason: config.reason.clone(),
                        rule: t,
                        global: global_timeout,
                    });
                }
                Some(t)
            }
            None => None,
        };

        let rule = Self::new(config.kind, config.condition.clone(), config.reason.clone())
            .with_command(PluginCommand {
                path,
                args: config.args.clone(),
                timeout,
            });
        rule.check_condition(defaults)?;
        Ok(rule)
    }

    fn check_condition(&self, defaults: &[ConditionDefault]) -> Result<(), ConfigError> {
        if self.kind != RuleKind::Permanent {
            return Ok(());
        }
        if defaults
            .iter()
            .any(|d| d.condition_type == self.condition)
        {
            return Ok(());
        }
        Err(ConfigError::UnknownCondition {
            reason: self.reason.clone(),
            condition: self.condition.clone(),
        })
    }
}

/// Compile `pattern` so that a match must reach the absolute end of the text.
///
/// # Errors
///
/// Returns the underlying regex error for invalid patterns.
pub fn compile_anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("(?:{pattern})\\z"))
}

/// Parse `countThreshold`/`expirePeriod` into an optional gate.
///
/// Thresholds of 0 or 1 mean "fire on every match" and produce no gate.
fn parse_debounce(config: &RuleConfig) -> Result<Option<Debounce>, ConfigError> {
    let threshold = match config.count_threshold.as_deref() {
        None => 0,
        Some(raw) => {
            raw.trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidThreshold {
                    reason: config.reason.clone(),
                    value: raw.to_owned(),
                })?
        }
    };

    let period = match config.expire_period.as_deref() {
        None => Duration::ZERO,
        Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
            field: format!("rule '{}' expirePeriod", config.reason),
            value: raw.to_owned(),
        })?,
    };

    if threshold > MAX_COUNT_THRESHOLD {
        return Err(ConfigError::TooLarge {
            field: format!("rule '{}' countThreshold", config.reason),
            value: threshold,
            max: MAX_COUNT_THRESHOLD,
        });
    }
    if threshold <= 1 {
        return Ok(None);
    }
    if period.is_zero() {
        return Err(ConfigError::MissingExpirePeriod {
            reason: config.reason.clone(),
            threshold,
        });
    }
    Ok(Some(Debounce { threshold, period }))
}
