//! Tests for `src/source/kmsg.rs` — kernel record parsing.

use chrono::{DateTime, TimeDelta, Utc};

use nodewatch::source::kmsg::{boot_time, parse_kmsg_record};

#[test]
fn parses_record_relative_to_boot() {
    let boot = DateTime::<Utc>::UNIX_EPOCH;
    let line = parse_kmsg_record(
        "6,339,5140900,-;NET: Registered protocol family 10\n SUBSYSTEM=net\n",
        boot,
    )
    .expect("record parses");

    assert_eq!(line.message, "NET: Registered protocol family 10");
    assert_eq!(line.timestamp, boot + TimeDelta::microseconds(5_140_900));
}

#[test]
fn message_may_contain_semicolons() {
    let line = parse_kmsg_record("4,1,10,-;a; b; c", DateTime::<Utc>::UNIX_EPOCH)
        .expect("record parses");
    assert_eq!(line.message, "a; b; c");
}

#[test]
fn rejects_malformed_records() {
    let boot = DateTime::<Utc>::UNIX_EPOCH;
    assert!(parse_kmsg_record("no header separator", boot).is_none());
    assert!(parse_kmsg_record("6,339;missing time", boot).is_none());
    assert!(parse_kmsg_record("6,339,abc,-;bad time", boot).is_none());
}

#[cfg(target_os = "linux")]
#[test]
fn boot_time_is_in_the_past() {
    let now = Utc::now();
    let boot = boot_time(now).expect("/proc/uptime readable");
    assert!(boot <= now);
}
