//! Filesystem watch host: turns notify events into coordinator edit events
//! and pumps the debounce loop. The standalone stand-in for an editor's
//! event stream.

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::coordinator::{Coordinator, PublishSink};
use crate::output::{render_summary, RenderMode};

const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "vendor",
];

/// True when the path is worth forwarding to the coordinator.
fn is_relevant(path: &Path, extensions: &[String]) -> bool {
    let excluded = path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .map(|s| EXCLUDED_DIRS.contains(&s))
            .unwrap_or(false)
    });
    if excluded {
        return false;
    }
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|want| want == ext))
        .unwrap_or(false)
}

/// Watch `project` and keep the coordinator's published state current.
/// Blocks until the watcher channel dies.
pub fn run<S: PublishSink>(
    project: &Path,
    extensions: &[String],
    coordinator: &mut Coordinator<S>,
    summary_mode: Option<RenderMode>,
    verbose: u8,
) -> Result<()> {
    let project = project
        .canonicalize()
        .unwrap_or_else(|_| project.to_path_buf());

    // Initial snapshot before registering the watcher.
    coordinator.scan_workspace(Instant::now());
    if let Some(mode) = summary_mode {
        render_summary(&coordinator.summary(), mode);
    }

    let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = tx.send(res);
        },
        Config::default(),
    )
    .context("Failed to create filesystem watcher")?;
    watcher
        .watch(&project, RecursiveMode::Recursive)
        .context("Failed to watch project directory")?;

    if verbose > 0 {
        eprintln!(
            "relint: watching {} backend=notify",
            project.to_string_lossy()
        );
    }

    loop {
        match rx.recv_timeout(Duration::from_millis(50)) {
            Ok(Ok(event)) => {
                let now = Instant::now();
                for path in event.paths.iter().filter(|p| is_relevant(p, extensions)) {
                    forward_change(coordinator, path, now, verbose);
                }
            }
            Ok(Err(e)) => {
                if verbose > 0 {
                    eprintln!("relint: watch error: {e}");
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                anyhow::bail!("Watcher channel disconnected");
            }
        }

        // Pump the debouncer; analyses fire once their quiet window passed.
        let processed = coordinator.poll(Instant::now());
        if processed > 0 {
            if let Some(mode) = summary_mode {
                render_summary(&coordinator.summary(), mode);
            }
        }
    }
}

fn forward_change<S: PublishSink>(
    coordinator: &mut Coordinator<S>,
    path: &PathBuf,
    now: Instant,
    verbose: u8,
) {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            if verbose > 1 {
                eprintln!("relint: change {}", path.display());
            }
            coordinator.notify_edit(path.clone(), content, now);
        }
        Err(_) => {
            // Deleted or unreadable: drop pending work and published state.
            coordinator.notify_close(path);
            coordinator.clear(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevance_filters_extensions_and_excluded_dirs() {
        let exts = vec!["py".to_string()];
        assert!(is_relevant(Path::new("src/app.py"), &exts));
        assert!(!is_relevant(Path::new("src/app.rs"), &exts));
        assert!(!is_relevant(Path::new("__pycache__/app.py"), &exts));
        assert!(!is_relevant(Path::new("a/.git/hook.py"), &exts));
        assert!(!is_relevant(Path::new("README"), &exts));
    }
}
