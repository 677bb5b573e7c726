//! Timestamped line sources feeding system-log monitors.
//!
//! The set of sources is closed and chosen once when a monitor definition is
//! loaded. Each source drops lines older than its look-back window and sends
//! the rest, in order, on a bounded channel.

pub mod file;
pub mod journal;
pub mod kmsg;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{mpsc, watch};

use crate::types::LogLine;

pub use self::file::{FileLineParser, FileSource};
pub use self::journal::JournalSource;
pub use self::kmsg::KmsgSource;

/// Errors raised while acquiring lines.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The log could not be opened.
    #[error("failed to open {}: {source}", .path.display())]
    Open {
        /// Log path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// The log could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        /// Log path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// `journalctl` could not be started.
    #[error("failed to start journalctl: {0}")]
    Spawn(#[source] io::Error),
}

/// One of the supported line sources.
#[derive(Debug)]
pub enum LineSource {
    /// Polled text file.
    File(FileSource),
    /// systemd journal via `journalctl`.
    Journal(JournalSource),
    /// Kernel ring buffer via `/dev/kmsg`.
    Kmsg(KmsgSource),
}

impl LineSource {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::File(_) => "filelog",
            Self::Journal(_) => "journald",
            Self::Kmsg(_) => "kmsg",
        }
    }

    /// Stream lines into `lines` until `shutdown` turns true, the receiver
    /// is dropped, or the source ends.
    ///
    /// # Errors
    ///
    /// Returns a [`SourceError`] if the underlying log cannot be opened or read.
    pub async fn run(
        self,
        lines: mpsc::Sender<LogLine>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), SourceError> {
        match self {
            Self::File(source) => source.run(lines, shutdown).await,
            Self::Journal(source) => source.run(lines, shutdown).await,
            Self::Kmsg(source) => source.run(lines, shutdown).await,
        }
    }
}

/// Oldest timestamp still inside the look-back window, if one is set.
pub(crate) fn lookback_cutoff(lookback: Option<Duration>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let window = TimeDelta::from_std(lookback?).ok()?;
    now.checked_sub_signed(window)
}

/// Whether `line` falls before `cutoff`.
pub(crate) fn is_stale(line: &LogLine, cutoff: Option<DateTime<Utc>>) -> bool {
    cutoff.is_some_and(|c| line.timestamp < c)
}

/// Resolve once `shutdown` is true or its sender is gone.
pub(crate) async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
