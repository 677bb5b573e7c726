//! Tests for `src/exporter/mod.rs` — health table and sinks.

use chrono::Utc;
use tokio::sync::mpsc;

use nodewatch::exporter::{
    run_aggregator, Exporter, HealthSnapshot, HealthTable, LogExporter, StatusFileExporter,
};
use nodewatch::types::{Condition, ConditionStatus, Event, Severity, Status};

fn status(source: &str, condition_status: ConditionStatus, events: usize) -> Status {
    let now = Utc::now();
    Status {
        source: source.to_owned(),
        events: (0..events)
            .map(|i| Event {
                severity: Severity::Warn,
                timestamp: now,
                reason: format!("Reason{i}"),
                message: format!("event {i}"),
            })
            .collect(),
        conditions: vec![Condition {
            condition_type: "KernelDeadlock".to_owned(),
            status: condition_status,
            transition: now,
            reason: "KernelHasNoDeadlock".to_owned(),
            message: String::new(),
        }],
    }
}

#[test]
fn later_status_replaces_conditions_for_its_source() {
    let mut table = HealthTable::new(10);
    table.apply(&status("kernel", ConditionStatus::False, 0));
    table.apply(&status("ntp", ConditionStatus::False, 0));
    table.apply(&status("kernel", ConditionStatus::True, 0));

    let kernel = table.conditions("kernel").expect("kernel tracked");
    assert_eq!(kernel.first().map(|c| c.status), Some(ConditionStatus::True));
    assert_eq!(
        table.conditions("ntp").and_then(|c| c.first()).map(|c| c.status),
        Some(ConditionStatus::False)
    );
    assert_eq!(table.sources().collect::<Vec<_>>(), vec!["kernel", "ntp"]);
}

#[test]
fn recent_events_are_bounded() {
    let mut table = HealthTable::new(3);
    table.apply(&status("kernel", ConditionStatus::False, 2));
    table.apply(&status("ntp", ConditionStatus::False, 2));

    let events: Vec<_> = table.events().map(|e| (e.source.as_str(), e.event.reason.as_str())).collect();
    assert_eq!(events, vec![("kernel", "Reason1"), ("ntp", "Reason0"), ("ntp", "Reason1")]);
}

#[tokio::test]
async fn status_file_is_written_atomically() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("status.json");
    let exporter = StatusFileExporter::new(path.clone());

    let update = status("kernel", ConditionStatus::True, 1);
    let mut table = HealthTable::new(10);
    table.apply(&update);
    exporter.export(&update, &table).await.expect("export succeeds");

    let contents = std::fs::read_to_string(&path).expect("status file exists");
    let snapshot: HealthSnapshot = serde_json::from_str(&contents).expect("valid snapshot JSON");
    assert!(snapshot.updated_at.is_some());
    assert_eq!(snapshot.events.len(), 1);
    assert!(snapshot.conditions.contains_key("kernel"));
    assert!(!path.with_extension("json.tmp").exists());
}

#[tokio::test]
async fn aggregator_folds_every_status_and_returns_when_senders_close() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("status.json");
    let exporters: Vec<Box<dyn Exporter>> = vec![
        Box::new(LogExporter),
        Box::new(StatusFileExporter::new(path.clone())),
    ];

    let (tx, rx) = mpsc::channel(4);
    let aggregator = tokio::spawn(run_aggregator(rx, HealthTable::new(10), exporters));

    tx.send(status("kernel", ConditionStatus::False, 0)).await.expect("send");
    tx.send(status("kernel", ConditionStatus::True, 1)).await.expect("send");
    drop(tx);

    let table = aggregator.await.expect("aggregator completes");
    assert_eq!(
        table.conditions("kernel").and_then(|c| c.first()).map(|c| c.status),
        Some(ConditionStatus::True)
    );
    assert_eq!(table.events().count(), 1);
    assert!(path.exists());
}

#[tokio::test]
async fn export_to_missing_directory_fails() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let exporter = StatusFileExporter::new(tmp.path().join("missing/dir/status.json"));
    let update = status("kernel", ConditionStatus::False, 0);
    let table = HealthTable::new(1);
    assert!(exporter.export(&update, &table).await.is_err());
}
