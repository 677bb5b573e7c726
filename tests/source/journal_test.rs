//! Tests for `src/source/journal.rs` — journalctl arguments and JSON entries.

use std::path::PathBuf;
use std::time::Duration;

use chrono::DateTime;

use nodewatch::source::journal::parse_journal_entry;
use nodewatch::source::JournalSource;

#[test]
fn args_follow_json_with_identifier_and_lookback() {
    let source = JournalSource::new(
        Some(PathBuf::from("/var/log/journal")),
        Some("kubelet".to_owned()),
        Some(Duration::from_secs(300)),
    );
    let args = source.journalctl_args();

    assert!(args.contains(&"--follow".to_owned()));
    assert!(args.contains(&"--output=json".to_owned()));
    assert!(args.contains(&"--since=-300s".to_owned()));
    assert!(args.contains(&"--directory=/var/log/journal".to_owned()));
    assert_eq!(args.last().map(String::as_str), Some("SYSLOG_IDENTIFIER=kubelet"));
}

#[test]
fn args_without_lookback_start_at_tail() {
    let args = JournalSource::new(None, None, None).journalctl_args();
    assert!(args.contains(&"--lines=0".to_owned()));
    assert!(!args.iter().any(|a| a.starts_with("SYSLOG_IDENTIFIER")));
}

#[test]
fn parses_string_message() {
    let line = parse_journal_entry(
        r#"{"__REALTIME_TIMESTAMP":"1700000000123456","MESSAGE":"Started kubelet.\n","SYSLOG_IDENTIFIER":"systemd"}"#,
    )
    .expect("entry parses");
    assert_eq!(line.message, "Started kubelet.");
    assert_eq!(
        Some(line.timestamp),
        DateTime::from_timestamp_micros(1_700_000_000_123_456)
    );
}

#[test]
fn parses_byte_array_message() {
    let line = parse_journal_entry(r#"{"__REALTIME_TIMESTAMP":"1","MESSAGE":[104,105]}"#)
        .expect("entry parses");
    assert_eq!(line.message, "hi");
}

#[test]
fn rejects_incomplete_entries() {
    assert!(parse_journal_entry(r#"{"MESSAGE":"no timestamp"}"#).is_none());
    assert!(parse_journal_entry(r#"{"__REALTIME_TIMESTAMP":"1"}"#).is_none());
    assert!(parse_journal_entry("not json").is_none());
}
