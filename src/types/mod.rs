//! Core health types shared by every monitor.
//!
//! A [`Status`] is the only thing that leaves a monitor: it carries the
//! events produced by one evaluation step plus the monitor's full condition
//! set, which downstream consumers treat as an authoritative replacement.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single timestamped log line produced by a line source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// When the line was logged.
    pub timestamp: DateTime<Utc>,
    /// Raw message text, without a trailing newline.
    pub message: String,
}

impl LogLine {
    /// Create a log line.
    pub fn new(timestamp: DateTime<Utc>, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            message: message.into(),
        }
    }
}

/// Tri-state status of a health condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    /// The problem described by the condition is present.
    True,
    /// The problem is absent.
    False,
    /// The state could not be determined.
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Severity of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational, e.g. a condition transition.
    Info,
    /// Something worth an operator's attention.
    Warn,
}

/// Default definition of a condition as declared in monitor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionDefault {
    /// Condition type, e.g. `KernelDeadlock`.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Reason reported while the condition is at its default (False) state.
    #[serde(default)]
    pub reason: String,
    /// Message reported while the condition is at its default state.
    #[serde(default)]
    pub message: String,
}

/// A durable, named health assessment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Condition type, unique within one monitor.
    #[serde(rename = "type")]
    pub condition_type: String,
    /// Current status.
    pub status: ConditionStatus,
    /// Last time the status or reason changed.
    pub transition: DateTime<Utc>,
    /// Machine-readable reason for the current status.
    pub reason: String,
    /// Human-readable details.
    pub message: String,
}

impl Condition {
    /// Build a condition at its default state: `status=False`, `transition=now`.
    pub fn from_default(default: &ConditionDefault, now: DateTime<Utc>) -> Self {
        Self {
            condition_type: default.condition_type.clone(),
            status: ConditionStatus::False,
            transition: now,
            reason: default.reason.clone(),
            message: default.message.clone(),
        }
    }
}

/// Build the full default condition set.
pub fn initial_conditions(defaults: &[ConditionDefault], now: DateTime<Utc>) -> Vec<Condition> {
    defaults
        .iter()
        .map(|d| Condition::from_default(d, now))
        .collect()
}

/// A transient occurrence, reported once and never retained by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Event severity.
    pub severity: Severity,
    /// When the event happened (first matched line, or plugin run time).
    pub timestamp: DateTime<Utc>,
    /// Machine-readable reason.
    pub reason: String,
    /// Human-readable details.
    pub message: String,
}

impl Event {
    /// Event announcing that `condition` changed at `timestamp`.
    pub fn condition_changed(condition: &Condition, timestamp: DateTime<Utc>) -> Self {
        Self {
            severity: Severity::Info,
            timestamp,
            reason: condition.reason.clone(),
            message: format!(
                "Node condition {} is now: {}, reason: {}, message: {:?}",
                condition.condition_type, condition.status, condition.reason, condition.message
            ),
        }
    }
}

/// Snapshot pushed downstream by a monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Name of the monitor that produced the snapshot.
    pub source: String,
    /// Events produced since the previous snapshot, in order.
    pub events: Vec<Event>,
    /// The monitor's complete condition set.
    pub conditions: Vec<Condition>,
}
