//! Sliding-window rate gate for noisy rules.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Opens once `threshold` matches have been observed within `window`.
///
/// Keeps the timestamps of the last `threshold` observations in a ring, so
/// each call is O(1) and no background sweeping is needed. The ring fills
/// lazily as matches arrive.
#[derive(Debug, Clone)]
pub struct DebounceGate {
    threshold: usize,
    slots: Vec<DateTime<Utc>>,
    cursor: usize,
    window: TimeDelta,
}

impl DebounceGate {
    /// Create a gate requiring `threshold` matches inside `window`.
    /// A threshold of zero is treated as one.
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            slots: Vec::new(),
            cursor: 0,
            window: TimeDelta::from_std(window).unwrap_or(TimeDelta::MAX),
        }
    }

    /// Record a match at `now` and report whether the gate is open.
    pub fn observe(&mut self, now: DateTime<Utc>) -> bool {
        if self.slots.len() < self.threshold {
            self.slots.push(now);
            if self.slots.len() < self.threshold {
                return false;
            }
        } else if let Some(slot) = self.slots.get_mut(self.cursor) {
            *slot = now;
            self.cursor = self
                .cursor
                .checked_add(1)
                .filter(|next| *next < self.slots.len())
                .unwrap_or(0);
        }

        // The slot under the cursor holds the oldest retained observation.
        match self.slots.get(self.cursor) {
            None => false,
            Some(oldest) => oldest
                .checked_add_signed(self.window)
                .is_none_or(|expires| expires > now),
        }
    }

    /// Forget every observation.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.cursor = 0;
    }
}
