//! nodewatch CLI entry point.
//!
//! Provides `run`, `validate`, and `check` subcommands for running the health
//! daemon, validating configuration, or running one custom plugin cycle.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{info, warn};

use nodewatch::config::{DaemonConfig, MonitorDefinition};
use nodewatch::engine::RuleEngine;
use nodewatch::exporter::{run_aggregator, Exporter, HealthTable, LogExporter, StatusFileExporter};
use nodewatch::logging;
use nodewatch::monitor::Monitor;
use nodewatch::plugin::hang::platform_detector;
use nodewatch::plugin::PluginExecutor;

/// nodewatch: node health daemon driven by log rules and diagnostic plugins.
#[derive(Parser)]
#[command(name = "nodewatch", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the health daemon until SIGINT or SIGTERM.
    Run {
        /// Daemon configuration file.
        #[arg(long, default_value = "nodewatch.toml")]
        config: PathBuf,
    },
    /// Load and validate every monitor definition, then exit.
    Validate {
        /// Daemon configuration file.
        #[arg(long, default_value = "nodewatch.toml")]
        config: PathBuf,
    },
    /// Run one cycle of a custom plugin monitor and print the statuses as JSON.
    Check {
        /// Custom plugin monitor definition.
        #[arg(long)]
        monitor: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run { config } => handle_run(&config).await,
        Command::Validate { config } => handle_validate(&config),
        Command::Check { monitor } => handle_check(&monitor).await,
    }
}

/// Directory relative monitor paths are resolved against.
fn config_base(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

/// Load all monitor definitions named by `config` and build the monitors.
fn build_monitors(config: &DaemonConfig, config_path: &Path) -> anyhow::Result<Vec<Monitor>> {
    config
        .load_definitions(config_base(config_path))?
        .iter()
        .map(|definition| {
            Monitor::from_definition(definition)
                .with_context(|| format!("invalid monitor '{}'", definition.source()))
        })
        .collect()
}

/// Run the health daemon.
async fn handle_run(config_path: &Path) -> anyhow::Result<()> {
    let config = DaemonConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let _logging_guard = match &config.logging.dir {
        Some(dir) => Some(logging::init_production(dir)?),
        None => {
            logging::init_cli();
            None
        }
    };

    let monitors = build_monitors(&config, config_path)?;
    if monitors.is_empty() {
        warn!("no monitors configured");
    }

    let mut exporters: Vec<Box<dyn Exporter>> = vec![Box::new(LogExporter)];
    if let Some(path) = &config.exporter.status_file {
        info!(path = %path.display(), "writing status file");
        exporters.push(Box::new(StatusFileExporter::new(path.clone())));
    }

    let (status_tx, status_rx) = mpsc::channel(config.exporter.queue_capacity.max(1));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let aggregator = tokio::spawn(run_aggregator(
        status_rx,
        HealthTable::new(config.exporter.max_events),
        exporters,
    ));

    let mut tasks = JoinSet::new();
    for monitor in monitors {
        info!(source = %monitor.source(), "starting monitor");
        tasks.spawn(monitor.run(status_tx.clone(), shutdown_rx.clone()));
    }
    drop(status_tx);

    info!(monitors = tasks.len(), "nodewatch started");

    tokio::select! {
        () = shutdown_signal() => info!("received shutdown signal, stopping monitors"),
        () = wait_all(&mut tasks) => warn!("all monitors exited"),
    }

    // Receivers may already be gone once every monitor has exited.
    let _ = shutdown_tx.send(true);
    wait_all(&mut tasks).await;

    let table = aggregator.await.context("health aggregator panicked")?;
    info!(sources = table.sources().count(), "nodewatch stopped");
    Ok(())
}

/// Join every remaining monitor task.
async fn wait_all(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "monitor task panicked");
        }
    }
}

/// Validate configuration without starting anything.
fn handle_validate(config_path: &Path) -> anyhow::Result<()> {
    logging::init_cli();

    let config = DaemonConfig::load(config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    let monitors = build_monitors(&config, config_path)?;

    for monitor in &monitors {
        println!("ok: {}", monitor.source());
    }
    println!("{} monitor(s) valid", monitors.len());
    Ok(())
}

/// Run one plugin cycle and print every resulting status.
async fn handle_check(monitor_path: &Path) -> anyhow::Result<()> {
    logging::init_cli();

    let definition = MonitorDefinition::load(monitor_path)?;
    let MonitorDefinition::Custom(config) = &definition else {
        bail!(
            "check only supports custom plugin monitors, {} is a {} monitor",
            monitor_path.display(),
            definition.plugin()
        );
    };

    let settings = config.settings()?;
    let rules = config.rules(&settings)?;
    let executor = PluginExecutor::new(rules, &settings, platform_detector());
    let mut engine = RuleEngine::new(config.engine_config());

    let mut statuses = vec![engine.initial_status()];
    for result in executor.collect_cycle().await {
        if let Some(status) = engine.ingest_result(&result) {
            statuses.push(status);
        }
    }

    let json = serde_json::to_string_pretty(&statuses).context("failed to serialize statuses")?;
    println!("{json}");
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

/// Resolve on Ctrl-C.
#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
