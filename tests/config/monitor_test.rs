//! Tests for monitor definition parsing and building.

use std::fs;
use std::time::Duration;

use nodewatch::config::monitor::MAX_BUFFER_SIZE;
use nodewatch::config::{ConfigError, MonitorDefinition};
use nodewatch::monitor::Monitor;

fn parse(json: &str) -> MonitorDefinition {
    MonitorDefinition::from_json(json).expect("valid definition JSON")
}

#[test]
fn kmsg_definition_builds_a_system_log_monitor() {
    let definition = parse(
        r#"{
          "plugin": "kmsg",
          "source": "kernel-monitor",
          "bufferSize": 10,
          "restartPattern": "Initializing cgroup subsys cpuset",
          "lookback": "5m",
          "conditions": [{"type": "KernelDeadlock", "reason": "KernelHasNoDeadlock", "message": "kernel has no deadlock"}],
          "rules": [
            {"type": "temporary", "reason": "OOMKilling", "pattern": "Killed process \\d+ (.+) total-vm:\\d+kB.*"},
            {"type": "permanent", "condition": "KernelDeadlock", "reason": "DockerHung", "pattern": "task docker:\\w+ blocked for more than \\w+ seconds\\."}
          ]
        }"#,
    );

    assert_eq!(definition.plugin(), "kmsg");
    assert_eq!(definition.source(), "kernel-monitor");
    let monitor = Monitor::from_definition(&definition).expect("valid monitor");
    assert!(matches!(monitor, Monitor::SystemLog(_)));
    assert_eq!(monitor.source(), "kernel-monitor");
}

#[test]
fn unknown_plugin_kind_is_a_parse_error() {
    assert!(MonitorDefinition::from_json(r#"{"plugin": "syslog-ng", "source": "x"}"#).is_err());
}

#[test]
fn malformed_file_is_a_parse_error() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("broken.json");
    fs::write(&path, "{ not json").expect("write file");
    assert!(matches!(
        MonitorDefinition::load(&path),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn filelog_requires_parsing_settings() {
    let definition = parse(
        r#"{"plugin": "filelog", "source": "app", "logPath": "/var/log/app.log",
            "pluginConfig": {"message": "msg=(.*)", "timestampFormat": "%Y-%m-%dT%H:%M:%S%z"}}"#,
    );
    let err = Monitor::from_definition(&definition).expect_err("timestamp regex missing");
    assert!(matches!(
        err,
        ConfigError::MissingSetting { field: "pluginConfig.timestamp", .. }
    ));
}

#[test]
fn filelog_with_full_settings_builds() {
    let definition = parse(
        r#"{"plugin": "filelog", "source": "app", "logPath": "/var/log/app.log",
            "pluginConfig": {"timestamp": "^(\\S+)", "message": "^\\S+ (.*)$",
                             "timestampFormat": "%Y-%m-%dT%H:%M:%S%z", "pollInterval": "250ms"},
            "rules": [{"type": "temporary", "reason": "Panic", "pattern": "panic:.*"}]}"#,
    );
    assert!(Monitor::from_definition(&definition).is_ok());
}

#[test]
fn zero_buffer_size_is_rejected() {
    let definition = parse(r#"{"plugin": "journald", "source": "j", "bufferSize": 0}"#);
    let err = Monitor::from_definition(&definition).expect_err("zero buffer");
    assert!(matches!(err, ConfigError::NonPositive { field: "bufferSize" }));
}

#[test]
fn oversized_buffer_size_is_rejected() {
    let definition =
        parse(r#"{"plugin": "kmsg", "source": "k", "bufferSize": 18446744073709551615}"#);
    let err = Monitor::from_definition(&definition).expect_err("buffer too large");
    assert!(matches!(
        err,
        ConfigError::TooLarge { ref field, max: MAX_BUFFER_SIZE, .. } if field == "bufferSize"
    ));
}

#[test]
fn invalid_restart_pattern_is_rejected() {
    let definition = parse(r#"{"plugin": "kmsg", "source": "k", "restartPattern": "(unclosed"}"#);
    let err = Monitor::from_definition(&definition).expect_err("bad regex");
    assert!(matches!(err, ConfigError::InvalidRegex { field: "restartPattern", .. }));
}

#[test]
fn invalid_lookback_is_rejected() {
    let definition = parse(r#"{"plugin": "kmsg", "source": "k", "lookback": "five minutes"}"#);
    let err = Monitor::from_definition(&definition).expect_err("bad lookback");
    assert!(matches!(err, ConfigError::InvalidDuration { .. }));
}

#[test]
fn duplicate_conditions_are_rejected() {
    let definition = parse(
        r#"{"plugin": "kmsg", "source": "k",
            "conditions": [{"type": "KernelDeadlock"}, {"type": "KernelDeadlock"}]}"#,
    );
    let err = Monitor::from_definition(&definition).expect_err("duplicate");
    assert!(matches!(err, ConfigError::DuplicateCondition(ref c) if c == "KernelDeadlock"));
}

#[test]
fn custom_settings_default_when_unset() {
    let MonitorDefinition::Custom(config) = parse(r#"{"plugin": "custom", "source": "ntp"}"#) else {
        panic!("expected a custom definition");
    };
    let settings = config.settings().expect("defaults are valid");
    assert_eq!(settings.invoke_interval, Duration::from_secs(30));
    assert_eq!(settings.timeout, Duration::from_secs(5));
    assert_eq!(settings.concurrency, 3);
    assert_eq!(settings.max_output_length, 80);
    assert!(!config.engine_config().message_change_updates);
}

#[test]
fn custom_settings_are_parsed() {
    let MonitorDefinition::Custom(config) = parse(
        r#"{"plugin": "custom", "source": "ntp",
            "pluginConfig": {"invokeInterval": "10s", "timeout": "3s", "concurrency": 1,
                             "maxOutputLength": 200,
                             "enableMessageChangeBasedConditionUpdate": true}}"#,
    ) else {
        panic!("expected a custom definition");
    };
    let settings = config.settings().expect("valid settings");
    assert_eq!(settings.invoke_interval, Duration::from_secs(10));
    assert_eq!(settings.timeout, Duration::from_secs(3));
    assert_eq!(settings.concurrency, 1);
    assert_eq!(settings.max_output_length, 200);
    assert!(config.engine_config().message_change_updates);
}

#[test]
fn zero_concurrency_is_rejected() {
    let MonitorDefinition::Custom(config) =
        parse(r#"{"plugin": "custom", "source": "ntp", "pluginConfig": {"concurrency": 0}}"#)
    else {
        panic!("expected a custom definition");
    };
    assert!(matches!(
        config.settings(),
        Err(ConfigError::NonPositive { field: "pluginConfig.concurrency" })
    ));
}

#[test]
fn zero_timeout_is_rejected() {
    let MonitorDefinition::Custom(config) =
        parse(r#"{"plugin": "custom", "source": "ntp", "pluginConfig": {"timeout": "0s"}}"#)
    else {
        panic!("expected a custom definition");
    };
    assert!(matches!(config.settings(), Err(ConfigError::NonPositive { .. })));
}

#[cfg(unix)]
#[test]
fn custom_definition_builds_a_plugin_monitor() {
    let definition = parse(
        r#"{"plugin": "custom", "source": "ntp",
            "conditions": [{"type": "NTPProblem", "reason": "NTPIsUp", "message": "ntp service is up"}],
            "rules": [{"type": "permanent", "condition": "NTPProblem", "reason": "NTPIsDown",
                       "path": "/bin/sh", "args": ["-c", "exit 0"], "timeout": "2s"}]}"#,
    );
    let monitor = Monitor::from_definition(&definition).expect("valid monitor");
    assert!(matches!(monitor, Monitor::CustomPlugin(_)));
}
