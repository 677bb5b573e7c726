//! Health aggregation and export.
//!
//! A single aggregator task owns the [`HealthTable`]. Every [`Status`] from
//! every monitor arrives on one bounded queue; the table replaces that
//! source's condition set, keeps a bounded list of recent events, and is then
//! handed to each [`Exporter`].

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::types::{Condition, Event, Severity, Status};

/// An event tagged with the monitor that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedEvent {
    /// Monitor source name.
    pub source: String,
    /// The event itself.
    #[serde(flatten)]
    pub event: Event,
}

/// Serializable view of the table, written by [`StatusFileExporter`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// When the last status was applied.
    pub updated_at: Option<DateTime<Utc>>,
    /// Condition set per source.
    pub conditions: BTreeMap<String, Vec<Condition>>,
    /// Recent events, oldest first.
    pub events: Vec<SourcedEvent>,
}

/// Latest node health as seen by all monitors.
#[derive(Debug, Clone)]
pub struct HealthTable {
    max_events: usize,
    conditions: BTreeMap<String, Vec<Condition>>,
    events: VecDeque<SourcedEvent>,
    updated_at: Option<DateTime<Utc>>,
}

impl HealthTable {
    /// Empty table retaining at most `max_events` recent events.
    pub fn new(max_events: usize) -> Self {
        Self {
            max_events,
            conditions: BTreeMap::new(),
            events: VecDeque::new(),
            updated_at: None,
        }
    }

    /// Fold one status into the table.
    pub fn apply(&mut self, status: &Status) {
        self.conditions
            .insert(status.source.clone(), status.conditions.clone());

        for event in &status.events {
            self.events.push_back(SourcedEvent {
                source: status.source.clone(),
                event: event.clone(),
            });
        }
        while self.events.len() > self.max_events {
            self.events.pop_front();
        }
        self.updated_at = Some(Utc::now());
    }

    /// Current conditions reported by `source`.
    pub fn conditions(&self, source: &str) -> Option<&[Condition]> {
        self.conditions.get(source).map(Vec::as_slice)
    }

    /// Names of every source seen so far.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.conditions.keys().map(String::as_str)
    }

    /// Recent events, oldest first.
    pub fn events(&self) -> impl Iterator<Item = &SourcedEvent> {
        self.events.iter()
    }

    /// Owned copy of the table for serialization.
    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            updated_at: self.updated_at,
            conditions: self.conditions.clone(),
            events: self.events.iter().cloned().collect(),
        }
    }
}

/// A sink for health updates.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Exporter name used in logs.
    fn name(&self) -> &str;

    /// Publish `status`, already folded into `table`.
    ///
    /// # Errors
    ///
    /// Returns an error if the update could not be published.
    async fn export(&self, status: &Status, table: &HealthTable) -> Result<()>;
}

/// Logs every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogExporter;

#[async_trait]
impl Exporter for LogExporter {
    fn name(&self) -> &str {
        "log"
    }

    async fn export(&self, status: &Status, _table: &HealthTable) -> Result<()> {
        for event in &status.events {
            match event.severity {
                Severity::Info => info!(
                    source = %status.source,
                    reason = %event.reason,
                    timestamp = %event.timestamp,
                    "{}", event.message
                ),
                Severity::Warn => warn!(
                    source = %status.source,
                    reason = %event.reason,
                    timestamp = %event.timestamp,
                    "{}", event.message
                ),
            }
        }
        Ok(())
    }
}

/// Writes the whole table as JSON after every update.
#[derive(Debug, Clone)]
pub struct StatusFileExporter {
    path: PathBuf,
}

impl StatusFileExporter {
    /// Exporter writing to `path`.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Target path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Exporter for StatusFileExporter {
    fn name(&self) -> &str {
        "status-file"
    }

    async fn export(&self, _status: &Status, table: &HealthTable) -> Result<()> {
        write_status_file(&table.snapshot(), &self.path).await
    }
}

/// Write `snapshot` to `path` atomically (temp file, then rename).
///
/// # Errors
///
/// Returns an error if serialization or file operations fail.
pub async fn write_status_file(snapshot: &HealthSnapshot, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(snapshot).context("failed to serialize health snapshot")?;

    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .with_context(|| format!("failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("failed to rename {} into place", tmp_path.display()))?;

    debug!(path = %path.display(), "status file updated");
    Ok(())
}

/// Consume statuses until every sender is gone, then return the final table.
pub async fn run_aggregator(
    mut statuses: mpsc::Receiver<Status>,
    mut table: HealthTable,
    exporters: Vec<Box<dyn Exporter>>,
) -> HealthTable {
    info!(exporters = exporters.len(), "health aggregator started");

    while let Some(status) = statuses.recv().await {
        table.apply(&status);
        for exporter in &exporters {
            if let Err(e) = exporter.export(&status, &table).await {
                warn!(exporter = exporter.name(), error = %e, "export failed");
            }
        }
    }

    info!("health aggregator stopped");
    table
}
