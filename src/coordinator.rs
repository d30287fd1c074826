//! Diagnostics coordinator: owns the authoritative violation set per
//! resource and wires cache, tracker, debouncer, dispatcher, and filter
//! registry together.
//!
//! Analysis is split into `begin_analysis` / `complete_analysis` so a
//! cooperative host loop can await the backend between the two phases
//! without blocking. The split is also what enforces the per-resource
//! guarantees: at most one analysis in flight, edits during flight are
//! recorded and re-scheduled, and a completion whose fingerprint no longer
//! matches current content is discarded instead of published.

use chrono::Utc;
use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::aggregate::{summarize, Summary};
use crate::backend::{AnalysisRequest, BackendError, Dispatcher, OutputFormat, Scope};
use crate::cache::{CacheKey, CacheStats, CacheStore};
use crate::fingerprint::Fingerprint;
use crate::registry::FilterRegistry;
use crate::schedule::Debouncer;
use crate::tracker::ChangeTracker;
use crate::violation::Violation;

// ── Publishing surface ──────────────────────────────────────

/// Presentation sink. Rendering is strictly a consumer: the coordinator
/// pushes per-resource snapshots and non-blocking notices, and signals
/// "data changed" so pull-model consumers (dashboard) re-read on demand.
pub trait PublishSink {
    fn publish(&mut self, path: &Path, violations: &[Violation]);
    fn notice(&mut self, message: &str);
    fn data_changed(&mut self);
}

// ── Per-resource state machine ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceState {
    #[default]
    Idle,
    Scheduled,
    Analyzing,
    Published,
}

/// Token for an in-flight analysis; holds the fingerprint the result must
/// still match at completion time.
#[derive(Debug)]
pub struct AnalysisTicket {
    path: PathBuf,
    fingerprint: Fingerprint,
    request: AnalysisRequest,
}

impl AnalysisTicket {
    pub fn request(&self) -> &AnalysisRequest {
        &self.request
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Dispatch needed; pass the ticket back via `complete_analysis`.
    Ticket(AnalysisTicket),
    /// Served from cache and published; nothing to dispatch.
    CacheHit,
    /// An analysis is already in flight; the request was recorded and will
    /// re-schedule once the flight completes.
    InFlight,
    /// Resource unreadable (deleted); state and cache were cleaned up.
    Gone,
}

impl PartialEq for AnalysisTicket {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.fingerprint == other.fingerprint
    }
}
impl Eq for AnalysisTicket {}

// ── Options ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub profile: String,
    pub format: OutputFormat,
    pub include_tests: bool,
    pub backend_timeout: Duration,
    pub debounce: Duration,
    /// Per-publish cap on diagnostics pushed for one resource.
    pub max_diagnostics: usize,
    pub persist_cache: bool,
    pub workspace_root: PathBuf,
    /// File extensions considered analyzable in workspace scans.
    pub extensions: Vec<String>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            profile: "default".into(),
            format: OutputFormat::Json,
            include_tests: false,
            backend_timeout: Duration::from_millis(10_000),
            debounce: Duration::from_millis(500),
            max_diagnostics: 500,
            persist_cache: true,
            workspace_root: PathBuf::from("."),
            extensions: vec!["py".into()],
        }
    }
}

// ── Coordinator ─────────────────────────────────────────────

pub struct Coordinator<S: PublishSink> {
    dispatcher: Dispatcher,
    cache: CacheStore,
    tracker: ChangeTracker,
    debouncer: Debouncer,
    registry: FilterRegistry,
    sink: S,
    opts: CoordinatorOptions,

    /// Open-document overlay; disk is the fallback for everything else.
    documents: HashMap<PathBuf, String>,
    states: HashMap<PathBuf, ResourceState>,
    /// Requests that arrived while a flight was up for the same resource.
    pending_rescan: HashSet<PathBuf>,
    /// Authoritative per-resource violation sets (unfiltered).
    analyzed: HashMap<PathBuf, Vec<Violation>>,
}

impl<S: PublishSink> Coordinator<S> {
    pub fn new(
        dispatcher: Dispatcher,
        cache: CacheStore,
        registry: FilterRegistry,
        sink: S,
        opts: CoordinatorOptions,
    ) -> Self {
        let debouncer = Debouncer::new(opts.debounce);
        Self {
            dispatcher,
            cache,
            tracker: ChangeTracker::new(),
            debouncer,
            registry,
            sink,
            opts,
            documents: HashMap::new(),
            states: HashMap::new(),
            pending_rescan: HashSet::new(),
            analyzed: HashMap::new(),
        }
    }

    pub fn state(&self, path: &Path) -> ResourceState {
        self.states.get(path).copied().unwrap_or_default()
    }

    pub fn registry_mut(&mut self) -> &mut FilterRegistry {
        &mut self.registry
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ── Host events ─────────────────────────────────────────

    /// Editor opened a document; analysis is scheduled for the next poll.
    pub fn notify_open(&mut self, path: impl Into<PathBuf>, text: impl Into<String>, now: Instant) {
        let path = path.into();
        self.documents.insert(path.clone(), text.into());
        self.states.insert(path.clone(), ResourceState::Scheduled);
        self.debouncer.schedule_immediate(path, now);
    }

    /// Editor edit event. Rapid edits collapse to one trailing analysis;
    /// an edit during an in-flight analysis is recorded and re-scheduled
    /// after that flight completes.
    pub fn notify_edit(&mut self, path: impl Into<PathBuf>, text: impl Into<String>, now: Instant) {
        let path = path.into();
        self.documents.insert(path.clone(), text.into());
        self.tracker.track_modification(path.clone());

        if self.state(&path) == ResourceState::Analyzing {
            self.pending_rescan.insert(path);
            return;
        }
        self.states.insert(path.clone(), ResourceState::Scheduled);
        self.debouncer.schedule(path, now);
    }

    /// Resource closed: pending timer canceled, overlay dropped, cache
    /// retained for re-open.
    pub fn notify_close(&mut self, path: &Path) {
        self.debouncer.cancel(path);
        self.documents.remove(path);
        self.pending_rescan.remove(path);
        self.states.insert(path.to_path_buf(), ResourceState::Idle);
    }

    /// Drain due debounce timers and run their analyses. Returns the number
    /// of resources processed.
    pub fn poll(&mut self, now: Instant) -> usize {
        let due = self.debouncer.due(now);
        let count = due.len();
        for path in due {
            self.run_analysis(&path, now);
        }
        count
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.debouncer.next_deadline()
    }

    // ── Imperative operations ───────────────────────────────

    /// Analyze one resource now (bypassing the debounce window). Backend
    /// failure is not an error to the caller: prior results are retained
    /// and a single non-blocking notice is emitted.
    pub fn scan_file(&mut self, path: &Path, now: Instant) {
        self.debouncer.cancel(path);
        self.run_analysis(path, now);
    }

    /// Analyze the workspace. Resources whose cache is still valid (and are
    /// not marked dirty) are served from cache without a backend call.
    pub fn scan_workspace(&mut self, now: Instant) -> usize {
        let files = self.workspace_files();

        // Pure fingerprint fan-out; results are joined before any cache
        // mutation, so the single-threaded coordination model holds.
        let fingerprints: Vec<(PathBuf, Option<Fingerprint>)> = files
            .par_iter()
            .map(|p| (p.clone(), Fingerprint::of_file(p).ok()))
            .collect();

        let mut analyzed = 0usize;
        for (path, fp) in fingerprints {
            let Some(fp) = fp else { continue };
            let key = self.cache_key(&path);
            if !self.tracker.is_dirty(&path) {
                if let Some(violations) = self.cache.get(&key, fp) {
                    self.analyzed.insert(path.clone(), violations);
                    self.states.insert(path.clone(), ResourceState::Published);
                    self.publish(&path);
                    continue;
                }
            }
            self.run_analysis(&path, now);
            analyzed += 1;
        }
        analyzed
    }

    /// Forget published results for one resource. Cache entries survive.
    pub fn clear(&mut self, path: &Path) {
        self.analyzed.remove(path);
        self.states.insert(path.to_path_buf(), ResourceState::Idle);
        self.sink.publish(path, &[]);
        self.sink.data_changed();
    }

    pub fn clear_all(&mut self) {
        let paths: Vec<PathBuf> = self.analyzed.keys().cloned().collect();
        for path in paths {
            self.clear(&path);
        }
    }

    /// Invalidate caches for open documents and re-analyze them.
    pub fn refresh_all(&mut self, now: Instant) {
        let open: Vec<PathBuf> = self.documents.keys().cloned().collect();
        for path in open {
            self.cache.invalidate_resource(&path);
            self.states.insert(path.clone(), ResourceState::Scheduled);
            self.debouncer.schedule_immediate(path, now);
        }
    }

    /// Flush persistent cache state; call once at host shutdown.
    pub fn dispose(&mut self) {
        self.cache.dispose();
    }

    // ── Read surface (problem list / dashboard pull) ────────

    /// Filtered violations for one resource, capped per publish policy.
    pub fn violations(&self, path: &Path) -> Vec<Violation> {
        match self.analyzed.get(path) {
            Some(vs) => self.visible(vs),
            None => Vec::new(),
        }
    }

    /// Filtered violations across all resources, in path order.
    pub fn all_violations(&self) -> Vec<Violation> {
        let mut paths: Vec<&PathBuf> = self.analyzed.keys().collect();
        paths.sort();
        paths
            .into_iter()
            .flat_map(|p| self.visible(&self.analyzed[p]))
            .collect()
    }

    /// Dashboard summary, recomputed from the current filtered set.
    pub fn summary(&self) -> Summary {
        summarize(&self.all_violations())
    }

    // ── Two-phase analysis ──────────────────────────────────

    /// Start an analysis for `path`. Consults the cache first; a valid
    /// entry publishes immediately with no ticket.
    pub fn begin_analysis(&mut self, path: &Path) -> BeginOutcome {
        if self.state(path) == ResourceState::Analyzing {
            self.pending_rescan.insert(path.to_path_buf());
            return BeginOutcome::InFlight;
        }

        let Some(fingerprint) = self.fingerprint_of(path) else {
            // Deleted resource: drop pending work and stale cache entries.
            self.debouncer.cancel(path);
            self.cache.invalidate_resource(path);
            self.analyzed.remove(path);
            self.states.insert(path.to_path_buf(), ResourceState::Idle);
            self.sink.publish(path, &[]);
            self.sink.data_changed();
            return BeginOutcome::Gone;
        };

        let key = self.cache_key(path);
        if let Some(violations) = self.cache.get(&key, fingerprint) {
            self.analyzed.insert(path.to_path_buf(), violations);
            self.tracker.clear_dirty(path);
            self.states.insert(path.to_path_buf(), ResourceState::Published);
            self.publish(path);
            return BeginOutcome::CacheHit;
        }

        self.states.insert(path.to_path_buf(), ResourceState::Analyzing);
        BeginOutcome::Ticket(AnalysisTicket {
            path: path.to_path_buf(),
            fingerprint,
            request: AnalysisRequest {
                target: path.to_path_buf(),
                scope: Scope::File,
                profile: self.opts.profile.clone(),
                format: self.opts.format,
                include_tests: self.opts.include_tests,
                timeout: self.opts.backend_timeout,
            },
        })
    }

    /// Finish an analysis started by `begin_analysis`. The fingerprint is
    /// recompared against current content: a mismatch discards the result
    /// (stale, not an error) and immediately re-schedules.
    pub fn complete_analysis(
        &mut self,
        ticket: AnalysisTicket,
        outcome: Result<Vec<Violation>, BackendError>,
        now: Instant,
    ) {
        let path = ticket.path.clone();
        let had_pending = self.pending_rescan.remove(&path);

        match outcome {
            Ok(violations) => {
                // The result is valid for the content it was computed from,
                // so it is cacheable even when it is no longer current.
                self.cache.set(
                    self.cache_key(&path),
                    violations.clone(),
                    ticket.fingerprint,
                    self.opts.persist_cache,
                );

                let current = self.fingerprint_of(&path);
                if current != Some(ticket.fingerprint) {
                    // Content moved on mid-flight: never publish stale data.
                    self.states.insert(path.clone(), ResourceState::Scheduled);
                    self.debouncer.schedule_immediate(path, now);
                    return;
                }

                self.analyzed.insert(path.clone(), violations);
                self.tracker.clear_dirty(&path);
                self.states.insert(path.clone(), ResourceState::Published);
                self.publish(&path);

                if had_pending {
                    self.states.insert(path.clone(), ResourceState::Scheduled);
                    self.debouncer.schedule_immediate(path, now);
                }
            }
            Err(e) => {
                // All backend paths exhausted: retain prior results, tell the
                // user once, and keep the resource usable.
                self.states.insert(path.clone(), ResourceState::Idle);
                self.sink
                    .notice(&format!("analysis unavailable for {}: {e}", path.display()));
                if had_pending {
                    self.states.insert(path.clone(), ResourceState::Scheduled);
                    self.debouncer.schedule_immediate(path, now);
                }
            }
        }
    }

    // ── Internals ───────────────────────────────────────────

    fn run_analysis(&mut self, path: &Path, now: Instant) {
        match self.begin_analysis(path) {
            BeginOutcome::Ticket(ticket) => {
                let outcome = self.dispatcher.analyze(ticket.request());
                self.complete_analysis(ticket, outcome, now);
            }
            BeginOutcome::CacheHit | BeginOutcome::InFlight | BeginOutcome::Gone => {}
        }
    }

    fn publish(&mut self, path: &Path) {
        let visible = match self.analyzed.get(path) {
            Some(vs) => self.visible(vs),
            None => Vec::new(),
        };
        self.sink.publish(path, &visible);
        self.sink.data_changed();
    }

    fn visible(&self, violations: &[Violation]) -> Vec<Violation> {
        let mut shown = self.registry.filter(violations, Utc::now());
        shown.truncate(self.opts.max_diagnostics);
        shown
    }

    fn cache_key(&self, path: &Path) -> CacheKey {
        CacheKey::new(path, self.opts.profile.clone())
    }

    /// Fingerprint from the open-document overlay, else from disk.
    fn fingerprint_of(&self, path: &Path) -> Option<Fingerprint> {
        if let Some(text) = self.documents.get(path) {
            return Some(Fingerprint::of_text(text));
        }
        Fingerprint::of_file(path).ok()
    }

    fn workspace_files(&self) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in WalkBuilder::new(&self.opts.workspace_root).build().flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| self.opts.extensions.iter().any(|want| want == ext))
                .unwrap_or(false);
            if matches {
                files.push(path.to_path_buf());
            }
        }
        files.sort();
        files
    }
}
