//! Tests for `src/monitor/mod.rs` — task loops wiring producers to engines.

use std::fs;
use std::io::Write;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};

use nodewatch::config::MonitorDefinition;
use nodewatch::engine::{EngineConfig, RuleEngine};
use nodewatch::monitor::{drive_engine, Monitor};
use nodewatch::rules::{Rule, RuleKind};
use nodewatch::types::{ConditionDefault, ConditionStatus, LogLine, Status};

async fn next_status(rx: &mut mpsc::Receiver<Status>) -> Status {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("status within timeout")
        .expect("status channel open")
}

#[tokio::test]
async fn drive_engine_sends_initial_status_then_firings() {
    let mut config = EngineConfig::new("kernel-monitor", vec![ConditionDefault {
        condition_type: "KernelDeadlock".to_owned(),
        reason: "KernelHasNoDeadlock".to_owned(),
        message: String::new(),
    }]);
    config.rules = vec![Rule::new(RuleKind::Permanent, "KernelDeadlock", "DockerHung")
        .with_pattern(r"task docker:\w+ blocked.*")
        .expect("valid pattern")];
    let engine = RuleEngine::new(config);

    let (line_tx, line_rx) = mpsc::channel(4);
    let (status_tx, mut status_rx) = mpsc::channel(4);

    line_tx.send(LogLine::new(Utc::now(), "noise")).await.expect("send line");
    line_tx
        .send(LogLine::new(Utc::now(), "task docker:1 blocked for 120s"))
        .await
        .expect("send line");
    drop(line_tx);

    drive_engine(engine, line_rx, &status_tx).await;
    drop(status_tx);

    let initial = next_status(&mut status_rx).await;
    assert!(initial.events.is_empty());
    assert_eq!(initial.conditions.first().map(|c| c.status), Some(ConditionStatus::False));

    let fired = next_status(&mut status_rx).await;
    assert_eq!(fired.conditions.first().map(|c| c.status), Some(ConditionStatus::True));
    assert_eq!(fired.events.len(), 1);

    assert!(status_rx.recv().await.is_none(), "noise produced no status");
}

#[tokio::test]
async fn filelog_monitor_reports_matches_and_stops_on_shutdown() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let log = tmp.path().join("app.log");
    fs::write(&log, "").expect("create log");

    let json = format!(
        r#"{{"plugin": "filelog", "source": "app-monitor", "logPath": {path:?},
            "pluginConfig": {{"timestamp": "^(\\S+)", "message": "^\\S+ (.*)$",
                              "timestampFormat": "%Y-%m-%dT%H:%M:%S%z", "pollInterval": "20ms"}},
            "conditions": [{{"type": "AppDeadlock", "reason": "AppIsFine"}}],
            "rules": [{{"type": "permanent", "condition": "AppDeadlock", "reason": "AppHung",
                        "pattern": "worker \\d+ hung.*"}}]}}"#,
        path = log.display().to_string()
    );
    let definition = MonitorDefinition::from_json(&json).expect("valid definition");
    let monitor = Monitor::from_definition(&definition).expect("valid monitor");

    let (status_tx, mut status_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(status_tx, shutdown_rx));

    let initial = next_status(&mut status_rx).await;
    assert_eq!(initial.source, "app-monitor");

    {
        let mut file = fs::OpenOptions::new().append(true).open(&log).expect("open log");
        writeln!(file, "2024-01-02T03:04:05+0000 worker 7 hung for 30s").expect("append line");
    }

    let fired = next_status(&mut status_rx).await;
    let condition = fired.conditions.first().expect("one condition");
    assert_eq!(condition.status, ConditionStatus::True);
    assert_eq!(condition.reason, "AppHung");

    shutdown_tx.send(true).expect("monitor listening");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor stops")
        .expect("monitor task completes");
}

#[cfg(unix)]
#[tokio::test]
async fn kmsg_monitor_stops_on_shutdown_while_reader_is_blocked() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let device = tmp.path().join("kmsg");
    let made = std::process::Command::new("mkfifo")
        .arg(&device)
        .status()
        .expect("run mkfifo");
    assert!(made.success(), "mkfifo failed");

    // Opening read-write never blocks and keeps a writer attached, so the
    // reader thread parks in `read` like it does on an idle /dev/kmsg.
    let mut writer = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&device)
        .expect("open fifo");

    let json = format!(
        r#"{{"plugin": "kmsg", "source": "kernel-monitor", "logPath": {path:?},
            "rules": [{{"type": "temporary", "reason": "OOMKilling",
                        "pattern": "Out of memory: Killed process \\d+.*"}}]}}"#,
        path = device.display().to_string()
    );
    let definition = MonitorDefinition::from_json(&json).expect("valid definition");
    let monitor = Monitor::from_definition(&definition).expect("valid monitor");

    let (status_tx, mut status_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(status_tx, shutdown_rx));

    let initial = next_status(&mut status_rx).await;
    assert_eq!(initial.source, "kernel-monitor");

    writer
        .write_all(b"3,812,5000000,-;Out of memory: Killed process 42 (java)\n")
        .expect("write record");
    let fired = next_status(&mut status_rx).await;
    let event = fired.events.first().expect("oom event");
    assert_eq!(event.reason, "OOMKilling");
    assert_eq!(event.message, "Out of memory: Killed process 42 (java)");

    shutdown_tx.send(true).expect("monitor listening");
    tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .expect("kmsg monitor stops while its reader is blocked")
        .expect("monitor task completes");
    assert!(status_rx.recv().await.is_none(), "status sender dropped");
}

#[cfg(unix)]
#[tokio::test]
async fn custom_monitor_reports_plugin_failures() {
    let definition = MonitorDefinition::from_json(
        r#"{"plugin": "custom", "source": "ntp",
            "pluginConfig": {"invokeInterval": "1h", "timeout": "5s"},
            "conditions": [{"type": "NTPProblem", "reason": "NTPIsUp", "message": "ntp service is up"}],
            "rules": [{"type": "permanent", "condition": "NTPProblem", "reason": "NTPIsDown",
                       "path": "/bin/sh", "args": ["-c", "echo NTP is down; exit 1"]}]}"#,
    )
    .expect("valid definition");
    let monitor = Monitor::from_definition(&definition).expect("valid monitor");

    let (status_tx, mut status_rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.run(status_tx, shutdown_rx));

    let initial = next_status(&mut status_rx).await;
    assert_eq!(initial.conditions.first().map(|c| c.status), Some(ConditionStatus::False));

    let fired = next_status(&mut status_rx).await;
    let condition = fired.conditions.first().expect("one condition");
    assert_eq!(condition.status, ConditionStatus::True);
    assert_eq!(condition.message, "NTP is down");

    shutdown_tx.send(true).expect("monitor listening");
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor stops")
        .expect("monitor task completes");
}
