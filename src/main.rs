use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Instant;

use relint::config::{self, Config};
use relint::coordinator::{Coordinator, PublishSink};
use relint::output::{render_summary, QuietSink, RenderMode, TerminalSink};
use relint::{CacheStore, Dispatcher, Severity};

#[derive(Parser)]
#[command(
    name = "relint",
    version,
    about = "Incremental lint coordinator - findings without redundant engine work",
    long_about = "Coordinates a slow external analysis engine: caches results by content \
fingerprint, debounces repeated changes, falls back between a persistent service and a \
local process, and aggregates findings into a risk dashboard."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a single file and print its findings
    Scan {
        /// File to analyze
        file: PathBuf,

        /// Minimum severity to display (overrides config)
        #[arg(long)]
        min_severity: Option<Severity>,

        /// Suppress findings at CATEGORY:LINE for this run (repeatable)
        #[arg(long, value_name = "CATEGORY:LINE")]
        suppress: Vec<String>,

        /// Machine-readable JSON output
        #[arg(long)]
        json: bool,
    },

    /// Analyze every matching file under a directory, incrementally
    Workspace {
        /// Workspace root (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Machine-readable JSON output
        #[arg(long)]
        json: bool,
    },

    /// Watch a directory and re-analyze changed files
    Watch {
        /// Directory to watch (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Print the dashboard summary after each change batch
        #[arg(long)]
        summary: bool,
    },

    /// Print the dashboard summary for a workspace
    Summary {
        /// Workspace root (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Machine-readable JSON output
        #[arg(long)]
        json: bool,
    },

    /// Inspect or clear the analysis cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Show or initialize configuration
    Config {
        /// Write a default config file if none exists
        #[arg(long)]
        init: bool,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show hit/miss/stale counts from the persistent stats table
    Stats,
    /// Drop every cached analysis result
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Scan {
            file,
            min_severity,
            suppress,
            json,
        } => {
            let mode = render_mode(json);
            let sink = TerminalSink::new(config.display.colors, config.display.emoji, mode);
            let root = file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let mut coordinator = build_coordinator(&config, root, sink, cli.verbose);

            if let Some(threshold) = min_severity {
                coordinator.registry_mut().set_threshold(threshold);
            }
            apply_suppressions(&mut coordinator, &file, &suppress)?;

            coordinator.scan_file(&file, Instant::now());
            coordinator.dispose();
        }

        Commands::Workspace { path, json } => {
            let mode = render_mode(json);
            let sink = TerminalSink::new(config.display.colors, config.display.emoji, mode);
            let mut coordinator = build_coordinator(&config, path, sink, cli.verbose);

            let analyzed = coordinator.scan_workspace(Instant::now());
            if cli.verbose > 0 {
                let stats = coordinator.cache_stats();
                eprintln!(
                    "relint: {analyzed} analyzed, {} served from cache",
                    stats.hits
                );
            }
            render_summary(&coordinator.summary(), mode);
            coordinator.dispose();
        }

        Commands::Watch { path, summary } => {
            let sink = TerminalSink::new(
                config.display.colors,
                config.display.emoji,
                RenderMode::Pretty,
            );
            let extensions = config.engine.extensions.clone();
            let mut coordinator = build_coordinator(&config, path.clone(), sink, cli.verbose);

            let summary_mode = summary.then_some(RenderMode::Pretty);
            let result = relint::watch::run(
                &path,
                &extensions,
                &mut coordinator,
                summary_mode,
                cli.verbose,
            );
            coordinator.dispose();
            result?;
        }

        Commands::Summary { path, json } => {
            let sink = QuietSink::new(config.display.emoji);
            let mut coordinator = build_coordinator(&config, path, sink, cli.verbose);

            coordinator.scan_workspace(Instant::now());
            render_summary(&coordinator.summary(), render_mode(json));
            coordinator.dispose();
        }

        Commands::Cache { command } => match command {
            CacheCommands::Stats => {
                let cache = CacheStore::new(config.cache_options(cli.verbose));
                let counts = cache.persisted_event_counts();
                if counts.is_empty() {
                    println!("(no cache activity recorded)");
                }
                for (event, count) in counts {
                    println!("{event}: {count}");
                }
            }
            CacheCommands::Clear => {
                let mut cache = CacheStore::new(config.cache_options(cli.verbose));
                cache.clear();
                cache.dispose();
                println!("cache cleared");
            }
        },

        Commands::Config { init } => {
            if init {
                let path = Config::create_default()?;
                println!("wrote {}", path.display());
            } else {
                config::show_config()?;
            }
        }
    }

    Ok(())
}

fn render_mode(json: bool) -> RenderMode {
    if json {
        RenderMode::Json
    } else {
        RenderMode::Pretty
    }
}

fn build_coordinator<S: PublishSink>(
    config: &Config,
    workspace_root: PathBuf,
    sink: S,
    verbose: u8,
) -> Coordinator<S> {
    let dispatcher = Dispatcher::from_selection(
        config.engine.backend,
        &config.engine.command,
        &config.service.host,
        config.service_timeout(),
        verbose,
    );
    let cache = CacheStore::new(config.cache_options(verbose));
    Coordinator::new(
        dispatcher,
        cache,
        config.filter_registry(),
        sink,
        config.coordinator_options(workspace_root),
    )
}

/// Parse `--suppress CATEGORY:LINE` flags into session suppressions.
fn apply_suppressions<S: PublishSink>(
    coordinator: &mut Coordinator<S>,
    file: &Path,
    specs: &[String],
) -> Result<()> {
    for spec in specs {
        let (category, line) = spec
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("--suppress expects CATEGORY:LINE, got '{spec}'"))?;
        let line: u32 = line
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid line in --suppress '{spec}'"))?;
        coordinator.registry_mut().suppress(
            category,
            file,
            line,
            30,
            chrono::Utc::now(),
        );
    }
    Ok(())
}
