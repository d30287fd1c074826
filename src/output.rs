//! Terminal rendering: the CLI host's problem list, notices, and dashboard
//! view. Strictly a consumer of coordinator snapshots.

use colored::Colorize;
use std::path::Path;

use crate::aggregate::Summary;
use crate::coordinator::PublishSink;
use crate::violation::{Severity, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    Pretty,
    Json,
}

pub struct TerminalSink {
    emoji: bool,
    mode: RenderMode,
    resources_published: usize,
}

impl TerminalSink {
    pub fn new(colors: bool, emoji: bool, mode: RenderMode) -> Self {
        if !colors {
            colored::control::set_override(false);
        }
        Self {
            emoji,
            mode,
            resources_published: 0,
        }
    }

    pub fn resources_published(&self) -> usize {
        self.resources_published
    }

    fn severity_tag(&self, severity: Severity) -> String {
        let label = severity.as_str().to_uppercase();
        match severity {
            Severity::Critical => label.as_str().red().bold().to_string(),
            Severity::High => label.as_str().red().to_string(),
            Severity::Medium => label.as_str().yellow().to_string(),
            Severity::Low => label.as_str().dimmed().to_string(),
        }
    }
}

impl PublishSink for TerminalSink {
    fn publish(&mut self, path: &Path, violations: &[Violation]) {
        self.resources_published += 1;

        if self.mode == RenderMode::Json {
            if let Ok(json) = serde_json::to_string(&serde_json::json!({
                "path": path,
                "violations": violations,
            })) {
                println!("{json}");
            }
            return;
        }

        if violations.is_empty() {
            let header = if self.emoji { "✅" } else { "ok" };
            println!("{header} {} clean", path.display());
            return;
        }

        let header = if self.emoji { "📄" } else { "--" };
        println!("{header} {} ({} findings)", path.display(), violations.len());
        for v in violations {
            let location = match v.column {
                Some(col) => format!("{}:{}", v.line, col),
                None => v.line.to_string(),
            };
            println!(
                "  {:>6}  {} [{}] {}",
                location,
                self.severity_tag(v.severity),
                v.category,
                v.message
            );
            if let Some(suggestion) = &v.suggestion {
                println!("          {}", suggestion.as_str().dimmed());
            }
        }
    }

    fn notice(&mut self, message: &str) {
        if self.mode == RenderMode::Json {
            if let Ok(json) = serde_json::to_string(&serde_json::json!({ "notice": message })) {
                eprintln!("{json}");
            }
            return;
        }
        let prefix = if self.emoji { "⚠" } else { "!" };
        eprintln!("{} {}", prefix.yellow(), message);
    }

    fn data_changed(&mut self) {
        // Pull-model consumers re-read on demand; nothing to push here.
    }
}

/// Sink that swallows per-resource snapshots and prints only notices.
/// Used by summary-style commands where the problem list would be noise.
pub struct QuietSink {
    emoji: bool,
}

impl QuietSink {
    pub fn new(emoji: bool) -> Self {
        Self { emoji }
    }
}

impl PublishSink for QuietSink {
    fn publish(&mut self, _path: &Path, _violations: &[Violation]) {}

    fn notice(&mut self, message: &str) {
        let prefix = if self.emoji { "⚠" } else { "!" };
        eprintln!("{} {}", prefix.yellow(), message);
    }

    fn data_changed(&mut self) {}
}

/// Dashboard view of the current summary.
pub fn render_summary(summary: &Summary, mode: RenderMode) {
    if mode == RenderMode::Json {
        if let Ok(json) = serde_json::to_string_pretty(summary) {
            println!("{json}");
        }
        return;
    }

    println!("total: {}  composite: {}", summary.total, summary.composite);

    let severity_line = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ]
    .iter()
    .map(|s| format!("{}: {}", s.as_str(), summary.count_for(*s)))
    .collect::<Vec<_>>()
    .join("  ");
    println!("{severity_line}");

    if !summary.by_category.is_empty() {
        let categories = summary
            .by_category
            .iter()
            .map(|(cat, n)| format!("{cat}: {n}"))
            .collect::<Vec<_>>()
            .join("  ");
        println!("categories: {categories}");
    }

    if !summary.ranking.is_empty() {
        println!();
        println!("{}", "riskiest resources".bold());
        for score in summary.ranking.iter().take(10) {
            println!(
                "  {:>5}  {} ({} findings)",
                score.composite,
                score.path.display(),
                score.count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn violation(severity: Severity) -> Violation {
        Violation {
            id: "t:a.py:1".into(),
            category: "test".into(),
            severity,
            message: "finding".into(),
            path: PathBuf::from("a.py"),
            line: 1,
            column: Some(2),
            weight: None,
            suggestion: Some("fix it".into()),
        }
    }

    #[test]
    fn sink_counts_published_resources() {
        let mut sink = TerminalSink::new(false, false, RenderMode::Json);
        sink.publish(Path::new("a.py"), &[violation(Severity::High)]);
        sink.publish(Path::new("b.py"), &[]);
        assert_eq!(sink.resources_published(), 2);
    }

    #[test]
    fn severity_tags_render_without_panic() {
        let sink = TerminalSink::new(false, false, RenderMode::Pretty);
        for s in [
            Severity::Low,
            Severity::Medium,
            Severity::High,
            Severity::Critical,
        ] {
            assert!(sink.severity_tag(s).to_uppercase().contains(&s.as_str().to_uppercase()));
        }
    }
}
