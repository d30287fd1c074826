//! Trailing-edge debouncer: rapid successive edits to one resource collapse
//! into a single analysis once the configured quiet window has passed.
//!
//! Every method takes `now` explicitly, so coalescing is deterministic under
//! test and the host loop owns the clock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    deadlines: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadlines: HashMap::new(),
        }
    }

    /// Arm (or re-arm) the single pending timer for `path`. Only the most
    /// recent call survives; intermediate edits within the window collapse.
    pub fn schedule(&mut self, path: impl Into<PathBuf>, now: Instant) {
        self.deadlines.insert(path.into(), now + self.delay);
    }

    /// Arm with no delay, so the next `due` poll picks the resource up.
    /// Used for stale-result re-scheduling after an in-flight analysis.
    pub fn schedule_immediate(&mut self, path: impl Into<PathBuf>, now: Instant) {
        self.deadlines.insert(path.into(), now);
    }

    /// Drop the pending timer for `path` (resource closed or deleted).
    pub fn cancel(&mut self, path: &Path) {
        self.deadlines.remove(path);
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.deadlines.contains_key(path)
    }

    /// Drain every resource whose quiet window has elapsed. Sorted for
    /// deterministic dispatch order.
    pub fn due(&mut self, now: Instant) -> Vec<PathBuf> {
        let mut ready: Vec<PathBuf> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &ready {
            self.deadlines.remove(path);
        }
        ready.sort();
        ready
    }

    /// Earliest pending deadline, for hosts that want to sleep precisely.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.values().min().copied()
    }

    pub fn pending_count(&self) -> usize {
        self.deadlines.len()
    }
}
