//! Fixed-capacity buffer of recent log lines with tail matching.

use std::collections::VecDeque;

use regex::Regex;

use crate::types::LogLine;

const SEPARATOR: char = '\n';

/// Holds the most recent `capacity` lines in insertion order.
///
/// Matching runs against the lines joined by `\n`. Patterns must be compiled
/// with [`crate::rules::compile_anchored`] so a match always reaches the end
/// of the newest line.
#[derive(Debug, Clone)]
pub struct MatchBuffer {
    capacity: usize,
    lines: VecDeque<LogLine>,
}

impl MatchBuffer {
    /// Create an empty buffer. A capacity of zero is bumped to one.
    /// Storage grows with the lines actually pushed.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            lines: VecDeque::new(),
        }
    }

    /// Record a line, evicting the oldest one when full.
    pub fn push(&mut self, line: LogLine) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Number of lines currently held.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the buffer holds no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Maximum number of lines held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every held line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// The buffer content: all messages joined by `\n`, oldest first.
    pub fn content(&self) -> String {
        let mut out = String::new();
        for (i, line) in self.lines.iter().enumerate() {
            if i > 0 {
                out.push(SEPARATOR);
            }
            out.push_str(&line.message);
        }
        out
    }

    /// Return the contiguous lines that produced a match of `pattern` ending
    /// at the end of the buffer, oldest first. Empty when nothing matches.
    pub fn find(&self, pattern: &Regex) -> Vec<LogLine> {
        if self.lines.is_empty() {
            return Vec::new();
        }

        let content = self.content();
        let Some(found) = pattern.find(&content) else {
            return Vec::new();
        };
        // `\z` guarantees this, but a pattern compiled elsewhere may not.
        if found.end() != content.len() {
            return Vec::new();
        }

        let distance = content.len().saturating_sub(found.start());
        let mut walked = 0usize;
        let mut matched = Vec::new();

        for line in self.lines.iter().rev() {
            matched.push(line.clone());
            walked = walked
                .saturating_add(line.message.len())
                .saturating_add(SEPARATOR.len_utf8());
            if walked >= distance {
                break;
            }
        }

        matched.reverse();
        matched
    }
}
