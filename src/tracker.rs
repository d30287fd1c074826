//! Dirty-set bookkeeping for incremental workspace scans: resources modified
//! since their last successful analysis. Pure state, no failure modes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
pub struct ChangeTracker {
    dirty: HashSet<PathBuf>,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track_modification(&mut self, path: impl Into<PathBuf>) {
        self.dirty.insert(path.into());
    }

    pub fn is_dirty(&self, path: &Path) -> bool {
        self.dirty.contains(path)
    }

    pub fn clear_dirty(&mut self, path: &Path) {
        self.dirty.remove(path);
    }

    /// Take the full dirty set, leaving it empty. Batch scans consume this
    /// once and re-mark anything that fails mid-pass.
    pub fn drain_dirty(&mut self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.dirty.drain().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.dirty.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirty.is_empty()
    }
}
