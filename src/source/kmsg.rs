//! Kernel ring buffer source reading `/dev/kmsg`.
//!
//! Each `read` on `/dev/kmsg` returns exactly one record of the form
//! `priority,sequence,microseconds,flags[,...];message`, optionally followed
//! by continuation lines. Timestamps are microseconds since boot.

use std::io::{self, Read};
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::{is_stale, lookback_cutoff, wait_for_shutdown, SourceError};
use crate::types::LogLine;

const RECORD_BUFFER: usize = 8192;
const RELAY_CAPACITY: usize = 64;

/// Reads kernel log records.
#[derive(Debug, Clone)]
pub struct KmsgSource {
    path: PathBuf,
    lookback: Option<Duration>,
}

impl KmsgSource {
    /// Create a source reading `path` (normally `/dev/kmsg`).
    pub fn new(path: PathBuf, lookback: Option<Duration>) -> Self {
        Self { path, lookback }
    }

    pub(super) async fn run(
        self,
        lines: mpsc::Sender<LogLine>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), SourceError> {
        let file = std::fs::File::open(&self.path).map_err(|source| SourceError::Open {
            path: self.path.clone(),
            source,
        })?;

        let now = Utc::now();
        let boot = boot_time(now).unwrap_or_else(|| {
            warn!("cannot read /proc/uptime, kernel timestamps will be relative to now");
            now
        });
        let cutoff = lookback_cutoff(self.lookback, now);
        info!(path = %self.path.display(), "reading kernel log");

        // Reads block in the kernel, so they run on a plain thread the
        // runtime does not wait for at shutdown. The thread only holds the
        // relay sender; `lines` is dropped as soon as this returns.
        let (relay_tx, mut relay_rx) = mpsc::channel(RELAY_CAPACITY);
        let (done_tx, done_rx) = oneshot::channel();
        let path = self.path.clone();
        std::thread::Builder::new()
            .name("kmsg-reader".to_owned())
            .spawn(move || {
                let result = read_records(file, &path, boot, cutoff, &relay_tx);
                let _ = done_tx.send(result);
            })
            .map_err(|source| SourceError::Read {
                path: self.path.clone(),
                source,
            })?;

        let stop = wait_for_shutdown(shutdown);
        tokio::pin!(stop);

        loop {
            tokio::select! {
                _ = &mut stop => return Ok(()),
                line = relay_rx.recv() => match line {
                    Some(line) => {
                        if lines.send(line).await.is_err() {
                            return Ok(());
                        }
                    }
                    None => break,
                },
            }
        }

        done_rx.await.unwrap_or(Ok(()))
    }
}

fn read_records(
    mut file: std::fs::File,
    path: &std::path::Path,
    boot: DateTime<Utc>,
    cutoff: Option<DateTime<Utc>>,
    lines: &mpsc::Sender<LogLine>,
) -> Result<(), SourceError> {
    let mut buf = vec![0u8; RECORD_BUFFER];
    loop {
        let n = match file.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            // Records were overwritten before we read them.
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => continue,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(SourceError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let record = String::from_utf8_lossy(buf.get(..n).unwrap_or_default());
        let Some(line) = parse_kmsg_record(&record, boot) else {
            debug!("skipping unparsable kmsg record");
            continue;
        };
        if is_stale(&line, cutoff) {
            continue;
        }
        if lines.blocking_send(line).is_err() {
            return Ok(());
        }
    }
}

/// Parse one `/dev/kmsg` record; continuation lines are ignored.
pub fn parse_kmsg_record(record: &str, boot: DateTime<Utc>) -> Option<LogLine> {
    let (header, rest) = record.split_once(';')?;
    let mut fields = header.split(',');
    let _priority = fields.next()?;
    let _sequence = fields.next()?;
    let micros: i64 = fields.next()?.trim().parse().ok()?;

    let message = rest.lines().next().unwrap_or_default();
    let timestamp = boot.checked_add_signed(TimeDelta::microseconds(micros))?;
    Some(LogLine::new(timestamp, message))
}

/// Wall-clock boot time derived from `/proc/uptime`.
pub fn boot_time(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let uptime = std::fs::read_to_string("/proc/uptime").ok()?;
    let seconds: f64 = uptime.split_whitespace().next()?.parse().ok()?;
    let uptime = TimeDelta::from_std(Duration::try_from_secs_f64(seconds).ok()?).ok()?;
    now.checked_sub_signed(uptime)
}
