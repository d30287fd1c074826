use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::backend::{BackendSelection, OutputFormat};
use crate::cache::CacheOptions;
use crate::coordinator::CoordinatorOptions;
use crate::registry::FilterRegistry;
use crate::violation::Severity;

#[derive(Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Per-category enable/override map, e.g. `[categories.naming]`.
    #[serde(default)]
    pub categories: BTreeMap<String, CategoryConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Which analysis path to prefer: auto, service, or process.
    pub backend: BackendSelection,
    /// External analyzer executable for the process path.
    pub command: String,
    /// Named policy/profile handed to the engine; also the cache kind.
    pub profile: String,
    /// Output shape requested from the process path.
    pub format: OutputFormat,
    pub include_tests: bool,
    pub timeout_ms: u64,
    /// Extensions considered analyzable in workspace scans.
    pub extensions: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendSelection::Auto,
            command: "lint-engine".into(),
            profile: "default".into(),
            format: OutputFormat::Json,
            include_tests: false,
            timeout_ms: 10_000,
            extensions: vec!["py".into()],
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub host: String,
    pub timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:7432".into(),
            timeout_ms: 3000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisplayConfig {
    pub colors: bool,
    pub emoji: bool,
    /// Minimum severity shown in the problem list.
    pub min_severity: Severity,
    /// Per-publish cap on diagnostics for one resource.
    pub max_diagnostics: usize,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            colors: true,
            emoji: true,
            min_severity: Severity::Low,
            max_diagnostics: 500,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Quiet window before an edited resource is re-analyzed.
    pub debounce_ms: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { debounce_ms: 500 }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub persistent: bool,
    pub max_entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persistent: true,
            max_entries: 4096,
            database_path: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CategoryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Remap every finding in this category to a fixed severity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
}

fn bool_true() -> bool {
    true
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn create_default() -> Result<PathBuf> {
        let config = Config::default();
        config.save()?;
        Ok(config_path())
    }

    // ── Component wiring ────────────────────────────────────

    pub fn coordinator_options(&self, workspace_root: PathBuf) -> CoordinatorOptions {
        CoordinatorOptions {
            profile: self.engine.profile.clone(),
            format: self.engine.format,
            include_tests: self.engine.include_tests,
            backend_timeout: Duration::from_millis(self.engine.timeout_ms),
            debounce: Duration::from_millis(self.schedule.debounce_ms),
            max_diagnostics: self.display.max_diagnostics,
            persist_cache: self.cache.persistent,
            workspace_root,
            extensions: self.engine.extensions.clone(),
        }
    }

    pub fn cache_options(&self, verbose: u8) -> CacheOptions {
        CacheOptions {
            persistent: self.cache.persistent,
            db_path: self.cache.database_path.clone(),
            max_entries: self.cache.max_entries,
            verbose,
        }
    }

    pub fn filter_registry(&self) -> FilterRegistry {
        let mut registry = FilterRegistry::new();
        registry.set_threshold(self.display.min_severity);
        for (category, rule) in &self.categories {
            registry.set_category_enabled(category, rule.enabled);
            registry.set_severity_override(category, rule.severity);
        }
        registry
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_millis(self.service.timeout_ms)
    }
}

/// Config path: `RELINT_CONFIG` env override, else the platform config dir.
pub fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("RELINT_CONFIG") {
        return PathBuf::from(p);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("relint")
        .join("config.toml")
}

pub fn show_config() -> Result<()> {
    let path = config_path();
    println!("Config: {}", path.display());
    println!();

    if path.exists() {
        let config = Config::load()?;
        println!("{}", toml::to_string_pretty(&config)?);
    } else {
        println!("(default config, file not created)");
        println!();
        let config = Config::default();
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}
