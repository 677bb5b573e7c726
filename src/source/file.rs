//! Tailing of plain-text log files.
//!
//! Polls the file with synchronous `std::fs` reads on the blocking pool,
//! tracking the byte offset so old lines are never re-read. Only complete
//! (newline-terminated) lines are consumed; a partial last line is picked up
//! on the next poll. Lines longer than 1 MiB are skipped without being held
//! in memory.

use std::fs;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use super::{is_stale, lookback_cutoff, wait_for_shutdown, SourceError};
use crate::types::LogLine;

const MAX_LINE_LEN: usize = 1_048_576;

/// Extracts timestamp and message from a raw text line.
#[derive(Debug, Clone)]
pub struct FileLineParser {
    timestamp: Regex,
    message: Regex,
    timestamp_format: String,
}

impl FileLineParser {
    /// Build a parser. Each regex contributes its first capture group (or the
    /// whole match when it has none). `timestamp_format` is a chrono format.
    ///
    /// # Errors
    ///
    /// Returns the regex error if either pattern is invalid.
    pub fn new(
        timestamp: &str,
        message: &str,
        timestamp_format: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            timestamp: Regex::new(timestamp)?,
            message: Regex::new(message)?,
            timestamp_format: timestamp_format.into(),
        })
    }

    /// Parse one raw line; `None` if either field is missing or the
    /// timestamp does not fit the format.
    pub fn parse(&self, raw: &str, now: DateTime<Utc>) -> Option<LogLine> {
        let ts = first_capture(&self.timestamp, raw)?;
        let message = first_capture(&self.message, raw)?;
        let timestamp = parse_timestamp(ts.trim(), &self.timestamp_format, now)?;
        Some(LogLine::new(timestamp, message))
    }
}

fn first_capture<'a>(re: &Regex, raw: &'a str) -> Option<&'a str> {
    let caps = re.captures(raw)?;
    caps.get(1).or_else(|| caps.get(0)).map(|m| m.as_str())
}

/// Parse `raw` with `format`. Zone-less timestamps are read as local time;
/// formats without a year take the year of `now`.
fn parse_timestamp(raw: &str, format: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_str(raw, format) {
        return Some(ts.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(raw, format).or_else(|_| {
        let year = now.with_timezone(&Local).year();
        NaiveDateTime::parse_from_str(&format!("{year} {raw}"), &format!("%Y {format}"))
    });

    let naive = naive.ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Polls one text file for appended lines.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    parser: FileLineParser,
    poll_interval: Duration,
    lookback: Option<Duration>,
    last_offset: u64,
}

impl FileSource {
    /// Create a source reading `path` from the beginning.
    pub fn new(
        path: PathBuf,
        parser: FileLineParser,
        poll_interval: Duration,
        lookback: Option<Duration>,
    ) -> Self {
        Self {
            path,
            parser,
            poll_interval,
            lookback,
            last_offset: 0,
        }
    }

    /// Path being tailed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read lines appended since the previous poll.
    ///
    /// A missing file yields no lines. A file that shrank (rotation or
    /// truncation) is re-read from the start. Lines that do not parse or fall
    /// outside the look-back window are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be opened or read.
    pub fn poll_lines(&mut self) -> Result<Vec<LogLine>, SourceError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = fs::File::open(&self.path).map_err(|source| SourceError::Open {
            path: self.path.clone(),
            source,
        })?;
        let file_len = file
            .metadata()
            .map_err(|source| self.read_error(source))?
            .len();

        if file_len < self.last_offset {
            debug!(path = %self.path.display(), "log file shrank, rereading from start");
            self.last_offset = 0;
        }
        if file_len == self.last_offset {
            return Ok(Vec::new());
        }

        let mut reader = BufReader::new(file);
        reader
            .seek(SeekFrom::Start(self.last_offset))
            .map_err(|source| self.read_error(source))?;

        let now = Utc::now();
        let cutoff = lookback_cutoff(self.lookback, now);
        let mut lines = Vec::new();
        let mut raw = Vec::new();

        loop {
            raw.clear();
            let line = read_capped_line(&mut reader, &mut raw)
                .map_err(|source| self.read_error(source))?;
            if !line.complete {
                break;
            }
            self.last_offset = self
                .last_offset
                .saturating_add(u64::try_from(line.consumed).unwrap_or(u64::MAX));

            if line.oversized {
                debug!(path = %self.path.display(), bytes = line.consumed, "skipping oversized log line");
                continue;
            }
            let text = String::from_utf8_lossy(&raw);
            let trimmed = text.trim_end_matches(['\n', '\r']);
            if trimmed.trim().is_empty() {
                continue;
            }

            match self.parser.parse(trimmed, now) {
                Some(line) if !is_stale(&line, cutoff) => lines.push(line),
                Some(_) => {}
                None => debug!(path = %self.path.display(), line = %trimmed, "skipping unparsable log line"),
            }
        }

        Ok(lines)
    }

    pub(super) async fn run(
        self,
        lines: mpsc::Sender<LogLine>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), SourceError> {
        info!(path = %self.path.display(), "tailing log file");
        let path = self.path.clone();
        let poll_interval = self.poll_interval;
        let stop = wait_for_shutdown(shutdown);
        tokio::pin!(stop);

        let mut tail = self;
        loop {
            let (returned, polled) = tokio::task::spawn_blocking(move || {
                let polled = tail.poll_lines();
                (tail, polled)
            })
            .await
            .map_err(|e| SourceError::Read {
                path: path.clone(),
                source: io::Error::other(e),
            })?;
            tail = returned;

            for line in polled? {
                if lines.send(line).await.is_err() {
                    return Ok(());
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = &mut stop => return Ok(()),
            }
        }
    }

    fn read_error(&self, source: io::Error) -> SourceError {
        SourceError::Read {
            path: self.path.clone(),
            source,
        }
    }
}

/// Outcome of [`read_capped_line`].
#[derive(Debug, Clone, Copy, Default)]
struct RawLine {
    /// Bytes consumed from the reader, newline included.
    consumed: usize,
    /// Whether a newline ended the line.
    complete: bool,
    /// Whether bytes past `MAX_LINE_LEN` were dropped.
    oversized: bool,
}

/// Read up to and including the next `\n`, keeping at most `MAX_LINE_LEN`
/// bytes in `buf` and discarding the rest of the line.
fn read_capped_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<RawLine> {
    let mut line = RawLine::default();
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(line);
        }

        let newline = available.iter().position(|b| *b == b'\n');
        let chunk = match newline {
            Some(end) => available.get(..=end).unwrap_or(available),
            None => available,
        };
        let room = MAX_LINE_LEN.saturating_sub(buf.len());
        if chunk.len() > room {
            line.oversized = true;
        }
        buf.extend_from_slice(chunk.get(..room.min(chunk.len())).unwrap_or_default());

        let taken = chunk.len();
        reader.consume(taken);
        line.consumed = line.consumed.saturating_add(taken);
        if newline.is_some() {
            line.complete = true;
            return Ok(line);
        }
    }
}
