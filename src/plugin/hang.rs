//! Detection of processes stuck in an uninterruptible kernel wait.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Reports whether a process could not be stopped by a signal.
pub trait HangDetector: Send + Sync + fmt::Debug {
    /// Whether `pid` is in an uninterruptible (hung) state.
    fn is_hung(&self, pid: u32) -> bool;
}

/// Reads the process state letter from `/proc/<pid>/stat`.
///
/// A process in state `D` (uninterruptible sleep) cannot act on a kill
/// signal until the kernel wakes it up.
#[derive(Debug, Clone)]
pub struct ProcStatHangDetector {
    proc_root: PathBuf,
}

impl ProcStatHangDetector {
    /// Detector reading from `/proc`.
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Detector reading from an alternative procfs mount.
    pub fn with_root(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    /// Current state letter of `pid`, if the process exists.
    pub fn process_state(&self, pid: u32) -> Option<char> {
        let path = self.proc_root.join(pid.to_string()).join("stat");
        let stat = std::fs::read_to_string(path).ok()?;
        parse_stat_state(&stat)
    }
}

impl Default for ProcStatHangDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl HangDetector for ProcStatHangDetector {
    fn is_hung(&self, pid: u32) -> bool {
        self.process_state(pid) == Some('D')
    }
}

/// Fallback for platforms without process-state inspection.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverHung;

impl HangDetector for NeverHung {
    fn is_hung(&self, _pid: u32) -> bool {
        false
    }
}

/// Extract the state letter from a `/proc/<pid>/stat` line.
///
/// The command name is parenthesised and may itself contain spaces or `)`,
/// so the state is the first field after the last `)`.
pub fn parse_stat_state(stat: &str) -> Option<char> {
    let (_, rest) = stat.rsplit_once(')')?;
    rest.trim_start().chars().next()
}

/// The detector appropriate for the current platform.
pub fn platform_detector() -> Arc<dyn HangDetector> {
    if cfg!(target_os = "linux") {
        Arc::new(ProcStatHangDetector::new())
    } else {
        Arc::new(NeverHung)
    }
}
