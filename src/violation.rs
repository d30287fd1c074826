//! Violation records and the ordered severity scale.
//! Violations are produced only by backend normalization and never mutated;
//! a fresh analysis replaces a resource's set wholesale.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Ordered severity scale. Derived `Ord` gives low < medium < high < critical,
/// which the filter threshold and the aggregator both rely on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Default composite-index weight for this severity.
    pub fn weight(self) -> u32 {
        match self {
            Severity::Low => 1,
            Severity::Medium => 2,
            Severity::High => 5,
            Severity::Critical => 10,
        }
    }

    /// Map a backend severity string onto the scale. Engines disagree on
    /// vocabulary; anything unrecognized lands on `Medium`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "info" | "minor" | "note" | "convention" => Severity::Low,
            "medium" | "warning" | "moderate" | "refactor" => Severity::Medium,
            "high" | "error" | "major" => Severity::High,
            "critical" | "blocker" | "fatal" => Severity::Critical,
            _ => Severity::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strict parsing for CLI flags; unlike [`Severity::parse`] an unknown
/// value is an error here, not a default.
impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!(
                "unknown severity '{other}' (expected low, medium, high, critical)"
            )),
        }
    }
}

/// A single static-analysis finding, normalized to a common shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Stable identifier; synthesized from category/path/line when the
    /// backend did not supply one.
    pub id: String,
    /// Rule or check category (e.g. "naming", "unused-import").
    pub category: String,
    pub severity: Severity,
    pub message: String,
    pub path: PathBuf,
    /// 1-based line number.
    pub line: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
    /// Backend-supplied composite weight; severity default applies when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weight: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Violation {
    /// Effective weight used by the composite index.
    pub fn effective_weight(&self) -> u32 {
        self.weight.unwrap_or_else(|| self.severity.weight())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_ordering_matches_scale() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn parse_maps_engine_vocabulary() {
        assert_eq!(Severity::parse("WARNING"), Severity::Medium);
        assert_eq!(Severity::parse("blocker"), Severity::Critical);
        assert_eq!(Severity::parse("info"), Severity::Low);
        assert_eq!(Severity::parse("major"), Severity::High);
    }

    #[test]
    fn parse_defaults_unknown_to_medium() {
        assert_eq!(Severity::parse("bogus"), Severity::Medium);
        assert_eq!(Severity::parse(""), Severity::Medium);
    }

    #[test]
    fn effective_weight_prefers_backend_override() {
        let mut v = Violation {
            id: "x".into(),
            category: "naming".into(),
            severity: Severity::Critical,
            message: "bad name".into(),
            path: PathBuf::from("a.py"),
            line: 3,
            column: None,
            weight: None,
            suggestion: None,
        };
        assert_eq!(v.effective_weight(), 10);
        v.weight = Some(42);
        assert_eq!(v.effective_weight(), 42);
    }
}
