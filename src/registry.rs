//! Severity/suppression filtering, applied on every publish.
//!
//! Category toggles and severity overrides come from configuration;
//! suppressions are session-scoped, time-boxed, and lazily expired by
//! timestamp comparison. All time-dependent methods take `now` explicitly.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::violation::{Severity, Violation};

/// Per-category filter settings.
#[derive(Debug, Clone, Default)]
pub struct CategoryRule {
    pub enabled: bool,
    pub severity_override: Option<Severity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SuppressionKey {
    category: String,
    path: PathBuf,
    line: u32,
}

#[derive(Debug)]
pub struct FilterRegistry {
    threshold: Severity,
    categories: HashMap<String, CategoryRule>,
    suppressions: HashMap<SuppressionKey, DateTime<Utc>>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        Self {
            threshold: Severity::Low,
            categories: HashMap::new(),
            suppressions: HashMap::new(),
        }
    }
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_threshold(&mut self, threshold: Severity) {
        self.threshold = threshold;
    }

    pub fn threshold(&self) -> Severity {
        self.threshold
    }

    pub fn set_category_enabled(&mut self, category: &str, enabled: bool) {
        self.categories
            .entry(category.to_string())
            .or_insert(CategoryRule {
                enabled: true,
                severity_override: None,
            })
            .enabled = enabled;
    }

    pub fn set_severity_override(&mut self, category: &str, severity: Option<Severity>) {
        self.categories
            .entry(category.to_string())
            .or_insert(CategoryRule {
                enabled: true,
                severity_override: None,
            })
            .severity_override = severity;
    }

    /// Severity after applying any per-category override. Unknown categories
    /// keep the backend-reported severity.
    pub fn effective_severity(&self, violation: &Violation) -> Severity {
        self.categories
            .get(&violation.category)
            .and_then(|rule| rule.severity_override)
            .unwrap_or(violation.severity)
    }

    /// Category enabled AND effective severity meets the threshold AND no
    /// live suppression for (category, path, line).
    pub fn should_show(&self, violation: &Violation, now: DateTime<Utc>) -> bool {
        if let Some(rule) = self.categories.get(&violation.category) {
            if !rule.enabled {
                return false;
            }
        }
        if self.effective_severity(violation) < self.threshold {
            return false;
        }
        !self.is_suppressed(&violation.category, &violation.path, violation.line, now)
    }

    /// Visible subset with overridden severities applied. Order preserved.
    pub fn filter(&self, violations: &[Violation], now: DateTime<Utc>) -> Vec<Violation> {
        violations
            .iter()
            .filter(|v| self.should_show(v, now))
            .map(|v| {
                let mut shown = v.clone();
                shown.severity = self.effective_severity(v);
                shown
            })
            .collect()
    }

    /// Hide (category, path, line) for `minutes` from `now`. Reversible via
    /// `unsuppress` within the window; expires on its own after it.
    pub fn suppress(
        &mut self,
        category: &str,
        path: impl Into<PathBuf>,
        line: u32,
        minutes: i64,
        now: DateTime<Utc>,
    ) {
        let key = SuppressionKey {
            category: category.to_string(),
            path: path.into(),
            line,
        };
        self.suppressions
            .insert(key, now + chrono::Duration::minutes(minutes));
    }

    pub fn unsuppress(&mut self, category: &str, path: &Path, line: u32) {
        self.suppressions.retain(|key, _| {
            !(key.category == category && key.path == path && key.line == line)
        });
    }

    pub fn is_suppressed(
        &self,
        category: &str,
        path: &Path,
        line: u32,
        now: DateTime<Utc>,
    ) -> bool {
        let key = SuppressionKey {
            category: category.to_string(),
            path: path.to_path_buf(),
            line,
        };
        match self.suppressions.get(&key) {
            Some(expiry) => *expiry > now,
            None => false,
        }
    }

    /// Drop expired records. Optional housekeeping; expiry is already
    /// handled lazily by `is_suppressed`.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) {
        self.suppressions.retain(|_, expiry| *expiry > now);
    }

    pub fn suppression_count(&self) -> usize {
        self.suppressions.len()
    }
}
