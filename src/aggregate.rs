//! Dashboard summary: a pure, order-independent fold over the current
//! filtered violation set. Recomputed on every publish — cheap at O(n) with
//! n capped by the max-diagnostics config — and never cached.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::violation::{Severity, Violation};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Summary {
    pub total: usize,
    /// Counts keyed by severity name, BTree for stable iteration order.
    pub by_severity: BTreeMap<String, usize>,
    pub by_category: BTreeMap<String, usize>,
    /// Weighted composite index: Σ per-violation weight
    /// (critical 10, high 5, medium 2, low 1 unless the backend overrode it).
    pub composite: u64,
    /// Resources ranked most-risky first.
    pub ranking: Vec<ResourceScore>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ResourceScore {
    pub path: PathBuf,
    pub composite: u64,
    pub count: usize,
}

/// Fold the violation set into a summary. Deterministic: ranking sorts by
/// composite desc, ties by count desc, then path asc.
pub fn summarize(violations: &[Violation]) -> Summary {
    let mut by_severity: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut per_resource: BTreeMap<PathBuf, (u64, usize)> = BTreeMap::new();
    let mut composite = 0u64;

    for v in violations {
        *by_severity.entry(v.severity.as_str().to_string()).or_default() += 1;
        *by_category.entry(v.category.clone()).or_default() += 1;

        let weight = u64::from(v.effective_weight());
        composite += weight;
        let slot = per_resource.entry(v.path.clone()).or_insert((0, 0));
        slot.0 += weight;
        slot.1 += 1;
    }

    let mut ranking: Vec<ResourceScore> = per_resource
        .into_iter()
        .map(|(path, (composite, count))| ResourceScore {
            path,
            composite,
            count,
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.composite
            .cmp(&a.composite)
            .then(b.count.cmp(&a.count))
            .then(a.path.cmp(&b.path))
    });

    Summary {
        total: violations.len(),
        by_severity,
        by_category,
        composite,
        ranking,
    }
}

impl Summary {
    pub fn empty() -> Self {
        summarize(&[])
    }

    pub fn count_for(&self, severity: Severity) -> usize {
        self.by_severity.get(severity.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn violation(path: &str, severity: Severity, weight: Option<u32>) -> Violation {
        Violation {
            id: format!("t:{path}"),
            category: "test".into(),
            severity,
            message: "finding".into(),
            path: PathBuf::from(path),
            line: 1,
            column: None,
            weight,
            suggestion: None,
        }
    }

    #[test]
    fn empty_set_summarizes_to_zero() {
        let s = summarize(&[]);
        assert_eq!(s.total, 0);
        assert_eq!(s.composite, 0);
        assert!(s.ranking.is_empty());
    }

    #[test]
    fn counts_and_composite_use_default_weights() {
        let vs = vec![
            violation("a.py", Severity::Critical, None),
            violation("a.py", Severity::High, None),
            violation("b.py", Severity::Medium, None),
            violation("b.py", Severity::Low, None),
        ];
        let s = summarize(&vs);
        assert_eq!(s.total, 4);
        assert_eq!(s.composite, 10 + 5 + 2 + 1);
        assert_eq!(s.count_for(Severity::Critical), 1);
        assert_eq!(s.count_for(Severity::Low), 1);
        assert_eq!(s.by_category.get("test"), Some(&4));
    }

    #[test]
    fn backend_weight_overrides_severity_default() {
        let s = summarize(&[violation("a.py", Severity::Low, Some(50))]);
        assert_eq!(s.composite, 50);
    }

    #[test]
    fn ranking_orders_by_composite_descending() {
        let vs = vec![
            violation("low.py", Severity::Low, None),
            violation("hot.py", Severity::Critical, None),
            violation("hot.py", Severity::High, None),
        ];
        let s = summarize(&vs);
        assert_eq!(s.ranking[0].path, PathBuf::from("hot.py"));
        assert_eq!(s.ranking[0].composite, 15);
        assert_eq!(s.ranking[1].path, PathBuf::from("low.py"));
    }

    #[test]
    fn ranking_ties_break_by_count_then_path() {
        // Same composite (4): one resource with two mediums, one with four lows.
        let vs = vec![
            violation("two.py", Severity::Medium, None),
            violation("two.py", Severity::Medium, None),
            violation("four.py", Severity::Low, None),
            violation("four.py", Severity::Low, None),
            violation("four.py", Severity::Low, None),
            violation("four.py", Severity::Low, None),
        ];
        let s = summarize(&vs);
        assert_eq!(s.ranking[0].path, PathBuf::from("four.py"), "count breaks tie");

        // Fully tied resources fall back to path order.
        let vs = vec![
            violation("b.py", Severity::Medium, None),
            violation("a.py", Severity::Medium, None),
        ];
        let s = summarize(&vs);
        assert_eq!(s.ranking[0].path, PathBuf::from("a.py"));
    }

    #[test]
    fn fold_is_order_independent() {
        let mut vs = vec![
            violation("a.py", Severity::Critical, None),
            violation("b.py", Severity::Low, None),
            violation("c.py", Severity::High, Some(3)),
        ];
        let forward = summarize(&vs);
        vs.reverse();
        assert_eq!(summarize(&vs), forward);
    }
}
