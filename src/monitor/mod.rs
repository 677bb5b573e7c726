//! Monitors: one engine plus the producer that feeds it.
//!
//! Each monitor runs as its own task. The producer (a line source or the
//! plugin executor) runs in a child task and hands inputs over a bounded
//! channel; the monitor task is the only writer of its engine's state. On
//! shutdown the producer stops, its channel closes, and the monitor task
//! returns after forwarding whatever was already queued.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::config::{ConfigError, MonitorDefinition};
use crate::engine::{RuleEngine, RuleEngineInput};
use crate::plugin::hang::{platform_detector, HangDetector};
use crate::plugin::{PluginExecutor, PluginResult};
use crate::source::LineSource;
use crate::types::{LogLine, Status};

/// Lines buffered between a source and its engine.
const LINE_QUEUE_CAPACITY: usize = 1000;

/// A log source driving a rule engine.
#[derive(Debug)]
pub struct SystemLogMonitor {
    engine: RuleEngine,
    source: LineSource,
}

impl SystemLogMonitor {
    /// Pair an engine with its line source.
    pub fn new(engine: RuleEngine, source: LineSource) -> Self {
        Self { engine, source }
    }

    /// Run until `shutdown` turns true or the source ends.
    pub async fn run(self, statuses: mpsc::Sender<Status>, shutdown: watch::Receiver<bool>) {
        let name = self.engine.source().to_owned();
        let kind = self.source.kind();
        info!(source = %name, kind, "starting system log monitor");

        let (line_tx, line_rx) = mpsc::channel::<LogLine>(LINE_QUEUE_CAPACITY);
        let line_source = self.source;
        let source_name = name.clone();
        let producer = tokio::spawn(async move {
            if let Err(e) = line_source.run(line_tx, shutdown).await {
                error!(source = %source_name, error = %e, "line source failed");
            }
        });

        drive_engine(self.engine, line_rx, &statuses).await;

        if let Err(e) = producer.await {
            warn!(source = %name, error = %e, "line source task panicked");
        }
        info!(source = %name, "system log monitor stopped");
    }
}

/// The plugin executor driving a rule engine.
#[derive(Debug)]
pub struct CustomPluginMonitor {
    engine: RuleEngine,
    executor: PluginExecutor,
}

impl CustomPluginMonitor {
    /// Pair an engine with its executor.
    pub fn new(engine: RuleEngine, executor: PluginExecutor) -> Self {
        Self { engine, executor }
    }

    /// Run until `shutdown` turns true.
    pub async fn run(self, statuses: mpsc::Sender<Status>, shutdown: watch::Receiver<bool>) {
        let name = self.engine.source().to_owned();
        info!(source = %name, rules = self.executor.rules().len(), "starting custom plugin monitor");

        let capacity = self.executor.rules().len().max(1);
        let (result_tx, result_rx) = mpsc::channel::<PluginResult>(capacity);
        let producer = tokio::spawn(self.executor.run(result_tx, shutdown));

        drive_engine(self.engine, result_rx, &statuses).await;

        if let Err(e) = producer.await {
            warn!(source = %name, error = %e, "plugin executor task panicked");
        }
        info!(source = %name, "custom plugin monitor stopped");
    }
}

/// Any supported monitor.
#[derive(Debug)]
pub enum Monitor {
    /// Log-driven monitor.
    SystemLog(SystemLogMonitor),
    /// Plugin-driven monitor.
    CustomPlugin(CustomPluginMonitor),
}

impl Monitor {
    /// Validate `definition` and build the monitor it describes, using the
    /// platform hang detector for plugins.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] in the definition.
    pub fn from_definition(definition: &MonitorDefinition) -> Result<Self, ConfigError> {
        Self::with_hang_detector(definition, platform_detector())
    }

    /// Like [`Monitor::from_definition`] with an explicit hang detector.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] in the definition.
    pub fn with_hang_detector(
        definition: &MonitorDefinition,
        hang_detector: Arc<dyn HangDetector>,
    ) -> Result<Self, ConfigError> {
        match definition {
            MonitorDefinition::Filelog(c) => Ok(Self::SystemLog(SystemLogMonitor::new(
                RuleEngine::new(c.engine_config()?),
                c.file_source()?,
            ))),
            MonitorDefinition::Journald(c) => Ok(Self::SystemLog(SystemLogMonitor::new(
                RuleEngine::new(c.engine_config()?),
                c.journal_source()?,
            ))),
            MonitorDefinition::Kmsg(c) => Ok(Self::SystemLog(SystemLogMonitor::new(
                RuleEngine::new(c.engine_config()?),
                c.kmsg_source()?,
            ))),
            MonitorDefinition::Custom(c) => {
                let settings = c.settings()?;
                let rules = c.rules(&settings)?;
                Ok(Self::CustomPlugin(CustomPluginMonitor::new(
                    RuleEngine::new(c.engine_config()),
                    PluginExecutor::new(rules, &settings, hang_detector),
                )))
            }
        }
    }

    /// Source name reported by the monitor.
    pub fn source(&self) -> &str {
        match self {
            Self::SystemLog(m) => m.engine.source(),
            Self::CustomPlugin(m) => m.engine.source(),
        }
    }

    /// Run the monitor until shutdown.
    pub async fn run(self, statuses: mpsc::Sender<Status>, shutdown: watch::Receiver<bool>) {
        match self {
            Self::SystemLog(m) => m.run(statuses, shutdown).await,
            Self::CustomPlugin(m) => m.run(statuses, shutdown).await,
        }
    }
}

/// Feed every input from `inputs` through `engine`, sending the initial
/// status first and then one status per firing. Returns when `inputs` closes
/// or the status receiver is dropped.
pub async fn drive_engine<I: RuleEngineInput>(
    mut engine: RuleEngine,
    mut inputs: mpsc::Receiver<I>,
    statuses: &mpsc::Sender<Status>,
) {
    if statuses.send(engine.initial_status()).await.is_err() {
        return;
    }

    while let Some(input) = inputs.recv().await {
        for status in input.ingest_into(&mut engine) {
            if statuses.send(status).await.is_err() {
                warn!(source = %engine.source(), "status receiver dropped");
                return;
            }
        }
    }
}
