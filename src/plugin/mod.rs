//! Bounded-concurrency execution of external diagnostic plugins.
//!
//! Every `invoke_interval` the [`PluginExecutor`] runs each plugin rule once,
//! at most `concurrency` at a time, and sends one [`PluginResult`] per rule
//! to a bounded queue. A run never fails: spawn errors, read errors, timeouts
//! and hung processes all become [`ExitStatus::Unknown`] results.

pub mod hang;

use std::io;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::rules::{PluginCommand, Rule};

use self::hang::HangDetector;

/// Bytes kept from each of stdout and stderr; the rest is drained.
pub const MAX_PIPE_BYTES: u64 = 4096;

/// How long to wait for a killed plugin to be reaped.
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Outcome class of one plugin run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Exit code 0: no problem.
    Ok,
    /// Exit code 1: problem detected.
    NonOk,
    /// Anything else, including timeouts and execution failures.
    Unknown,
}

impl ExitStatus {
    /// Map a process exit code: `0 → Ok`, `1 → NonOk`, anything else `Unknown`.
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(0) => Self::Ok,
            Some(1) => Self::NonOk,
            _ => Self::Unknown,
        }
    }
}

/// Result of running one plugin rule once.
#[derive(Debug, Clone)]
pub struct PluginResult {
    /// The rule that was run.
    pub rule: Arc<Rule>,
    /// Outcome class.
    pub exit_status: ExitStatus,
    /// Trimmed, truncated stdout, or a diagnostic for failed runs.
    pub message: String,
    /// When the run started.
    pub timestamp: DateTime<Utc>,
}

impl PluginResult {
    fn unknown(rule: Arc<Rule>, timestamp: DateTime<Utc>, message: String) -> Self {
        Self {
            rule,
            exit_status: ExitStatus::Unknown,
            message,
            timestamp,
        }
    }
}

/// Global executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginSettings {
    /// Time between cycles.
    pub invoke_interval: Duration,
    /// Upper bound for every run.
    pub timeout: Duration,
    /// Maximum number of plugins running at once.
    pub concurrency: usize,
    /// Maximum length of a result message, in bytes.
    pub max_output_length: usize,
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            invoke_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            concurrency: 3,
            max_output_length: 80,
        }
    }
}

/// Runs a single plugin rule with timeout, output capping and hang detection.
#[derive(Debug, Clone)]
pub struct PluginRunner {
    timeout: Duration,
    max_output_length: usize,
    hang_detector: Arc<dyn HangDetector>,
}

impl PluginRunner {
    /// Create a runner from global settings.
    pub fn new(settings: &PluginSettings, hang_detector: Arc<dyn HangDetector>) -> Self {
        Self {
            timeout: settings.timeout,
            max_output_length: settings.max_output_length,
            hang_detector,
        }
    }

    /// Run `rule` once and classify the outcome.
    pub async fn run(&self, rule: Arc<Rule>) -> PluginResult {
        let started = Utc::now();
        let Some(command) = rule.command.clone() else {
            let message = format!("rule {} has no plugin command", rule.reason);
            return PluginResult::unknown(rule, started, message);
        };

        let timeout = command.effective_timeout(self.timeout);
        let (exit_status, message) = self.execute(&command, timeout).await;

        debug!(
            reason = %rule.reason,
            plugin = %command.path.display(),
            status = ?exit_status,
            "plugin run finished"
        );

        PluginResult {
            rule,
            exit_status,
            message,
            timestamp: started,
        }
    }

    async fn execute(&self, command: &PluginCommand, timeout: Duration) -> (ExitStatus, String) {
        let plugin = command.path.display().to_string();

        let mut cmd = Command::new(&command.path);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        own_process_group(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(plugin = %plugin, error = %e, "failed to start plugin");
                return (
                    ExitStatus::Unknown,
                    format!("error starting plugin {plugin}: {e}"),
                );
            }
        };
        let pid = child.id();

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            terminate(&mut child, pid).await;
            return (
                ExitStatus::Unknown,
                format!("error creating output pipes for plugin {plugin}"),
            );
        };

        let outcome = tokio::time::timeout(timeout, async {
            let (out, err) = tokio::join!(read_capped(stdout), read_capped(stderr));
            let status = child.wait().await;
            (out, err, status)
        })
        .await;

        match outcome {
            Ok((out, err, status)) => self.classify(&plugin, out, err, status),
            Err(_) => self.on_timeout(&mut child, pid, &plugin, timeout).await,
        }
    }

    fn classify(
        &self,
        plugin: &str,
        out: io::Result<Vec<u8>>,
        err: io::Result<Vec<u8>>,
        status: io::Result<std::process::ExitStatus>,
    ) -> (ExitStatus, String) {
        let stdout = match out {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(plugin = %plugin, error = %e, "failed to read plugin stdout");
                return (
                    ExitStatus::Unknown,
                    format!("error reading stdout of plugin {plugin}: {e}"),
                );
            }
        };

        match err {
            Ok(bytes) if !bytes.is_empty() => {
                debug!(plugin = %plugin, stderr = %String::from_utf8_lossy(&bytes).trim(), "plugin stderr");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(plugin = %plugin, error = %e, "failed to read plugin stderr");
                return (
                    ExitStatus::Unknown,
                    format!("error reading stderr of plugin {plugin}: {e}"),
                );
            }
        }

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                warn!(plugin = %plugin, error = %e, "failed to wait for plugin");
                return (
                    ExitStatus::Unknown,
                    format!("error waiting for plugin {plugin}: {e}"),
                );
            }
        };

        let output = String::from_utf8_lossy(&stdout);
        (
            ExitStatus::from_code(status.code()),
            truncate_output(output.trim(), self.max_output_length),
        )
    }

    async fn on_timeout(
        &self,
        child: &mut Child,
        pid: Option<u32>,
        plugin: &str,
        timeout: Duration,
    ) -> (ExitStatus, String) {
        terminate(child, pid).await;

        if pid.is_some_and(|p| self.hang_detector.is_hung(p)) {
            warn!(plugin = %plugin, pid = ?pid, "plugin timed out and is hung");
            return (
                ExitStatus::Unknown,
                format!("plugin {plugin} timed out after {timeout:?}: process is hung"),
            );
        }

        let state = match tokio::time::timeout(KILL_GRACE, child.wait()).await {
            Ok(Ok(exit)) => exit.to_string(),
            Ok(Err(e)) => format!("unknown ({e})"),
            Err(_) => {
                if pid.is_some_and(|p| self.hang_detector.is_hung(p)) {
                    warn!(plugin = %plugin, pid = ?pid, "plugin did not exit after kill and is hung");
                    return (
                        ExitStatus::Unknown,
                        format!("plugin {plugin} timed out after {timeout:?}: process is hung"),
                    );
                }
                "still running after kill".to_owned()
            }
        };

        warn!(plugin = %plugin, state = %state, "plugin timed out");
        (
            ExitStatus::Unknown,
            format!("plugin {plugin} timed out after {timeout:?}, state: {state}"),
        )
    }
}

/// Periodic driver running every plugin rule once per cycle.
#[derive(Debug)]
pub struct PluginExecutor {
    rules: Vec<Arc<Rule>>,
    runner: PluginRunner,
    concurrency: usize,
    invoke_interval: Duration,
}

impl PluginExecutor {
    /// Create an executor for `rules`.
    pub fn new(
        rules: Vec<Arc<Rule>>,
        settings: &PluginSettings,
        hang_detector: Arc<dyn HangDetector>,
    ) -> Self {
        Self {
            rules,
            runner: PluginRunner::new(settings, hang_detector),
            concurrency: settings.concurrency.max(1),
            invoke_interval: settings.invoke_interval,
        }
    }

    /// Rules run each cycle.
    pub fn rules(&self) -> &[Arc<Rule>] {
        &self.rules
    }

    /// Run every rule once, at most `concurrency` at a time, sending each
    /// result as soon as it is ready. Returns when all runs have finished.
    pub async fn run_cycle(&self, results: &mpsc::Sender<PluginResult>) {
        let slots = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for rule in &self.rules {
            let slots = Arc::clone(&slots);
            let runner = self.runner.clone();
            let results = results.clone();
            let rule = Arc::clone(rule);

            tasks.spawn(async move {
                let Ok(_permit) = slots.acquire_owned().await else {
                    return;
                };
                let result = runner.run(rule).await;
                if results.send(result).await.is_err() {
                    debug!("plugin result receiver dropped");
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "plugin task panicked");
            }
        }
    }

    /// Run one cycle and collect its results.
    pub async fn collect_cycle(&self) -> Vec<PluginResult> {
        let (tx, mut rx) = mpsc::channel(self.rules.len().max(1));
        let collector = tokio::spawn(async move {
            let mut results = Vec::new();
            while let Some(result) = rx.recv().await {
                results.push(result);
            }
            results
        });

        self.run_cycle(&tx).await;
        drop(tx);

        collector.await.unwrap_or_default()
    }

    /// Run a cycle immediately and then once per interval until `shutdown`
    /// turns true. An in-flight cycle is never interrupted.
    pub async fn run(self, results: mpsc::Sender<PluginResult>, mut shutdown: watch::Receiver<bool>) {
        info!(
            rules = self.rules.len(),
            interval_secs = self.invoke_interval.as_secs(),
            concurrency = self.concurrency,
            "plugin executor started"
        );

        let mut interval = tokio::time::interval(self.invoke_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            self.run_cycle(&results).await;

            if results.is_closed() {
                debug!("plugin result queue closed");
                break;
            }
        }

        info!("plugin executor stopped");
    }
}

/// Read up to [`MAX_PIPE_BYTES`] and drain the rest so the child never
/// blocks on a full pipe.
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R) -> io::Result<Vec<u8>> {
    let mut kept = Vec::new();
    (&mut reader).take(MAX_PIPE_BYTES).read_to_end(&mut kept).await?;
    tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(kept)
}

/// Kill the plugin's process group (best effort), then the plugin itself.
async fn terminate(child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        kill_process_group(pid).await;
    }
    if let Err(e) = child.start_kill() {
        debug!(error = %e, "plugin already exited before kill");
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
async fn kill_process_group(pgid: u32) {
    let status = Command::new("kill")
        .args(["-KILL", "--", &format!("-{pgid}")])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = status {
        debug!(pgid, error = %e, "failed to signal plugin process group");
    }
}

#[cfg(not(unix))]
async fn kill_process_group(_pgid: u32) {}

/// Truncate `output` to at most `max` bytes on a character boundary.
pub fn truncate_output(output: &str, max: usize) -> String {
    if output.len() <= max {
        return output.to_owned();
    }
    let mut end = max;
    while !output.is_char_boundary(end) {
        end = end.saturating_sub(1);
    }
    output.get(..end).unwrap_or_default().to_owned()
}
