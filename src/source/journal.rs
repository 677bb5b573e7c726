//! systemd journal source, following `journalctl --output=json`.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{is_stale, lookback_cutoff, wait_for_shutdown, SourceError};
use crate::types::LogLine;

/// Follows the journal, optionally restricted to one syslog identifier.
#[derive(Debug, Clone)]
pub struct JournalSource {
    directory: Option<PathBuf>,
    identifier: Option<String>,
    lookback: Option<Duration>,
}

impl JournalSource {
    /// Create a journal source. `directory` selects a non-default journal.
    pub fn new(
        directory: Option<PathBuf>,
        identifier: Option<String>,
        lookback: Option<Duration>,
    ) -> Self {
        Self {
            directory,
            identifier,
            lookback,
        }
    }

    /// Arguments passed to `journalctl`.
    pub fn journalctl_args(&self) -> Vec<String> {
        let mut args = vec![
            "--follow".to_owned(),
            "--output=json".to_owned(),
            "--no-pager".to_owned(),
        ];
        match self.lookback {
            Some(window) => args.push(format!("--since=-{}s", window.as_secs())),
            None => args.push("--lines=0".to_owned()),
        }
        if let Some(dir) = &self.directory {
            args.push(format!("--directory={}", dir.display()));
        }
        if let Some(identifier) = &self.identifier {
            args.push(format!("SYSLOG_IDENTIFIER={identifier}"));
        }
        args
    }

    pub(super) async fn run(
        self,
        lines: mpsc::Sender<LogLine>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), SourceError> {
        let mut child = Command::new("journalctl")
            .args(self.journalctl_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(SourceError::Spawn)?;

        let Some(stdout) = child.stdout.take() else {
            return Err(SourceError::Spawn(std::io::Error::other(
                "journalctl stdout unavailable",
            )));
        };
        info!(identifier = ?self.identifier, "following journal");

        let cutoff = lookback_cutoff(self.lookback, Utc::now());
        let mut reader = BufReader::new(stdout).lines();
        let stop = wait_for_shutdown(shutdown);
        tokio::pin!(stop);

        loop {
            let next = tokio::select! {
                next = reader.next_line() => next,
                _ = &mut stop => break,
            };

            let raw = match next {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    warn!("journalctl exited");
                    break;
                }
                Err(source) => {
                    return Err(SourceError::Read {
                        path: PathBuf::from("journalctl"),
                        source,
                    })
                }
            };

            let Some(line) = parse_journal_entry(&raw) else {
                debug!("skipping unparsable journal entry");
                continue;
            };
            if is_stale(&line, cutoff) {
                continue;
            }
            if lines.send(line).await.is_err() {
                break;
            }
        }

        if let Err(e) = child.start_kill() {
            debug!(error = %e, "journalctl already exited");
        }
        Ok(())
    }
}

/// Parse one JSON journal entry into a line.
///
/// `MESSAGE` may be a string or, for non-UTF-8 payloads, an array of bytes.
pub fn parse_journal_entry(raw: &str) -> Option<LogLine> {
    let entry: Value = serde_json::from_str(raw).ok()?;

    let micros: i64 = entry.get("__REALTIME_TIMESTAMP")?.as_str()?.parse().ok()?;
    let timestamp = DateTime::<Utc>::from_timestamp_micros(micros)?;

    let message = match entry.get("MESSAGE")? {
        Value::String(s) => s.clone(),
        Value::Array(bytes) => {
            let bytes = bytes
                .iter()
                .map(|b| b.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        _ => return None,
    };

    Some(LogLine::new(timestamp, message.trim_end()))
}
