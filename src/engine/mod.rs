//! Rule evaluation and the condition state machine.
//!
//! A [`RuleEngine`] is owned by exactly one monitor task. It holds the match
//! buffer, the debounce gates and the condition set, and turns each firing
//! into one [`Status`] snapshot. Nothing else touches this state, so no
//! locking is involved.

pub mod buffer;
pub mod debounce;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::plugin::{ExitStatus, PluginResult};
use crate::rules::{Rule, RuleKind};
use crate::types::{
    initial_conditions, Condition, ConditionDefault, ConditionStatus, Event, LogLine, Severity,
    Status,
};

use self::buffer::MatchBuffer;
use self::debounce::DebounceGate;

/// Everything needed to build a [`RuleEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Name reported as [`Status::source`].
    pub source: String,
    /// Match buffer capacity in lines.
    pub buffer_size: usize,
    /// Default conditions, one per condition type.
    pub defaults: Vec<ConditionDefault>,
    /// Log rules evaluated on every line.
    pub rules: Vec<Rule>,
    /// Pattern that resets all conditions when it matches (e.g. a kernel boot line).
    pub restart_pattern: Option<Regex>,
    /// Also update a True condition whose reason is unchanged but whose message differs.
    pub message_change_updates: bool,
}

impl EngineConfig {
    /// Minimal configuration with no rules, for plugin-driven engines and tests.
    pub fn new(source: impl Into<String>, defaults: Vec<ConditionDefault>) -> Self {
        Self {
            source: source.into(),
            buffer_size: 10,
            defaults,
            rules: Vec::new(),
            restart_pattern: None,
            message_change_updates: false,
        }
    }
}

/// Single-writer evaluation engine for one monitor.
#[derive(Debug)]
pub struct RuleEngine {
    source: String,
    buffer: MatchBuffer,
    rules: Vec<Rule>,
    gates: HashMap<String, DebounceGate>,
    defaults: Vec<ConditionDefault>,
    conditions: Vec<Condition>,
    restart_pattern: Option<Regex>,
    message_change_updates: bool,
}

impl RuleEngine {
    /// Build an engine with every condition at its default state.
    pub fn new(config: EngineConfig) -> Self {
        let mut gates = HashMap::new();
        for rule in &config.rules {
            if let Some(debounce) = rule.debounce {
                if debounce.threshold > 1 && !debounce.period.is_zero() {
                    gates
                        .entry(rule.reason.clone())
                        .or_insert_with(|| DebounceGate::new(debounce.threshold, debounce.period));
                }
            }
        }

        Self {
            buffer: MatchBuffer::new(config.buffer_size),
            conditions: initial_conditions(&config.defaults, Utc::now()),
            source: config.source,
            rules: config.rules,
            gates,
            defaults: config.defaults,
            restart_pattern: config.restart_pattern,
            message_change_updates: config.message_change_updates,
        }
    }

    /// Name of the monitor this engine reports for.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Current condition set.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Baseline snapshot: the current conditions and no events.
    pub fn initial_status(&self) -> Status {
        self.status(Vec::new())
    }

    /// Put every condition back to its configured default.
    pub fn reset_conditions(&mut self) {
        self.conditions = initial_conditions(&self.defaults, Utc::now());
    }

    /// Feed one log line through every rule.
    ///
    /// Returns one snapshot per rule that fired, in rule order, each carrying
    /// the conditions as they stood right after that firing. A matching
    /// restart marker yields a single reset snapshot instead.
    pub fn ingest_line(&mut self, line: LogLine) -> Vec<Status> {
        self.buffer.push(line);

        let restarted = self
            .restart_pattern
            .as_ref()
            .is_some_and(|marker| !self.buffer.find(marker).is_empty());
        if restarted {
            info!(source = %self.source, "restart marker matched, resetting conditions");
            self.reset_conditions();
            return vec![self.status(Vec::new())];
        }

        let mut statuses = Vec::new();

        for rule in &self.rules {
            let Some(pattern) = &rule.pattern else {
                continue;
            };
            let matched = self.buffer.find(pattern);
            let Some(first) = matched.first() else {
                continue;
            };

            let timestamp = first.timestamp;
            let message = matched
                .iter()
                .map(|l| l.message.as_str())
                .collect::<Vec<_>>()
                .join("\n");

            if let Some(gate) = self.gates.get_mut(&rule.reason) {
                if !gate.observe(timestamp) {
                    debug!(source = %self.source, reason = %rule.reason, "match suppressed by debounce gate");
                    continue;
                }
            }

            let mut events = Vec::new();
            apply_firing(
                &mut self.conditions,
                rule,
                timestamp,
                message,
                self.message_change_updates,
                &mut events,
            );
            statuses.push(Status {
                source: self.source.clone(),
                events,
                conditions: self.conditions.clone(),
            });
        }

        statuses
    }

    /// Feed one plugin result.
    ///
    /// `NonOk` fires the rule, `Unknown` produces a warning event only and
    /// `Ok` is treated as no match (returns `None`).
    pub fn ingest_result(&mut self, result: &PluginResult) -> Option<Status> {
        let mut events = Vec::new();

        match result.exit_status {
            ExitStatus::Ok => return None,
            ExitStatus::Unknown => events.push(Event {
                severity: Severity::Warn,
                timestamp: result.timestamp,
                reason: result.rule.reason.clone(),
                message: result.message.clone(),
            }),
            ExitStatus::NonOk => apply_firing(
                &mut self.conditions,
                &result.rule,
                result.timestamp,
                result.message.clone(),
                self.message_change_updates,
                &mut events,
            ),
        }

        Some(self.status(events))
    }

    fn status(&self, events: Vec<Event>) -> Status {
        Status {
            source: self.source.clone(),
            events,
            conditions: self.conditions.clone(),
        }
    }
}

/// Something a [`RuleEngine`] can evaluate.
pub trait RuleEngineInput: Send + 'static {
    /// Evaluate `self`, returning the statuses to emit in order.
    fn ingest_into(self, engine: &mut RuleEngine) -> Vec<Status>;
}

impl RuleEngineInput for LogLine {
    fn ingest_into(self, engine: &mut RuleEngine) -> Vec<Status> {
        engine.ingest_line(self)
    }
}

impl RuleEngineInput for PluginResult {
    fn ingest_into(self, engine: &mut RuleEngine) -> Vec<Status> {
        engine.ingest_result(&self).into_iter().collect()
    }
}

/// Apply one firing of `rule` to the condition set, appending any events.
fn apply_firing(
    conditions: &mut [Condition],
    rule: &Rule,
    timestamp: DateTime<Utc>,
    message: String,
    message_change_updates: bool,
    events: &mut Vec<Event>,
) {
    match rule.kind {
        RuleKind::Temporary => events.push(Event {
            severity: Severity::Warn,
            timestamp,
            reason: rule.reason.clone(),
            message,
        }),
        RuleKind::Permanent => {
            let Some(condition) = conditions
                .iter_mut()
                .find(|c| c.condition_type == rule.condition)
            else {
                warn!(condition = %rule.condition, reason = %rule.reason, "rule names an unknown condition");
                return;
            };

            if condition.status != ConditionStatus::True || condition.reason != rule.reason {
                condition.transition = timestamp;
                condition.message = message;
                condition.reason = rule.reason.clone();
                condition.status = ConditionStatus::True;
                info!(
                    condition = %condition.condition_type,
                    reason = %condition.reason,
                    "condition changed"
                );
                events.push(Event::condition_changed(condition, timestamp));
            } else if message_change_updates && condition.message != message {
                condition.message = message;
                debug!(condition = %condition.condition_type, "condition message changed");
                events.push(Event::condition_changed(condition, timestamp));
            }
        }
    }
}
