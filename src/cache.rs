//! Analysis cache: (resource, profile)-keyed violation sets tagged with the
//! fingerprint that produced them. In-memory map in front, SQLite WAL behind
//! for entries flagged persistent. Storage failures degrade the session to
//! memory-only; they never reach the coordinator.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::fingerprint::Fingerprint;
use crate::violation::Violation;

// ── Keys and entries ────────────────────────────────────────

/// Cache key: resource path plus the analysis profile that produced the
/// result. Results under different profiles are distinct entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub path: PathBuf,
    pub profile: String,
}

impl CacheKey {
    pub fn new(path: impl Into<PathBuf>, profile: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            profile: profile.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fingerprint: Fingerprint,
    violations: Vec<Violation>,
    persistent: bool,
}

/// Session counters, kept separate from the durable cache_stats table so
/// tests can assert hit/miss behavior without a database.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stale: u64,
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Master switch for SQLite persistence. When off, `set(.., true)` still
    /// succeeds but the entry lives only for this session.
    pub persistent: bool,
    /// Explicit database path; `None` resolves env/default locations.
    pub db_path: Option<PathBuf>,
    pub max_entries: usize,
    pub verbose: u8,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            persistent: true,
            db_path: None,
            max_entries: 4096,
            verbose: 0,
        }
    }
}

// ── Store ───────────────────────────────────────────────────

pub struct CacheStore {
    entries: HashMap<CacheKey, CacheEntry>,
    conn: Option<Connection>,
    max_entries: usize,
    stats: CacheStats,
    verbose: u8,
}

impl CacheStore {
    /// Open the store. A failed database open is not fatal: the session
    /// degrades to memory-only caching.
    pub fn new(opts: CacheOptions) -> Self {
        let conn = if opts.persistent {
            match open_cache_db(opts.db_path.as_deref()) {
                Ok(conn) => Some(conn),
                Err(e) => {
                    if opts.verbose > 0 {
                        eprintln!("relint: cache persistence disabled: {e:#}");
                    }
                    None
                }
            }
        } else {
            None
        };

        Self {
            entries: HashMap::new(),
            conn,
            max_entries: opts.max_entries,
            stats: CacheStats::default(),
            verbose: opts.verbose,
        }
    }

    /// Return the stored set only if its fingerprint matches `current`.
    /// A mismatch reports a miss without deleting the entry.
    pub fn get(&mut self, key: &CacheKey, current: Fingerprint) -> Option<Vec<Violation>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.fingerprint == current {
                if entry.persistent {
                    self.touch(key);
                }
                self.stats.hits += 1;
                self.record_event("hit", &key.path);
                return Some(entry.violations.clone());
            }
            self.stats.stale += 1;
            self.record_event("stale", &key.path);
            return None;
        }

        // Memory miss: a persisted entry from a previous session may still
        // match the current content.
        if let Some(entry) = self.load_persisted(key) {
            if entry.fingerprint == current {
                let violations = entry.violations.clone();
                self.entries.insert(key.clone(), entry);
                self.stats.hits += 1;
                self.record_event("hit", &key.path);
                return Some(violations);
            }
        }

        self.stats.misses += 1;
        self.record_event("miss", &key.path);
        None
    }

    /// Overwrite any prior entry for `key`.
    pub fn set(
        &mut self,
        key: CacheKey,
        violations: Vec<Violation>,
        fingerprint: Fingerprint,
        persistent: bool,
    ) {
        if persistent {
            self.store_persisted(&key, &violations, fingerprint);
        }
        self.entries.insert(
            key,
            CacheEntry {
                fingerprint,
                violations,
                persistent,
            },
        );
    }

    /// Remove the entry for `key`. Idempotent.
    pub fn invalidate(&mut self, key: &CacheKey) {
        self.entries.remove(key);
        if let Some(conn) = self.conn.as_ref() {
            let _ = conn.execute(
                "DELETE FROM entries WHERE path = ?1 AND profile = ?2",
                params![key.path.to_string_lossy(), key.profile],
            );
        }
    }

    /// Remove every entry for a resource across all profiles (file deleted
    /// or closed-and-forgotten).
    pub fn invalidate_resource(&mut self, path: &Path) {
        self.entries.retain(|k, _| k.path != path);
        if let Some(conn) = self.conn.as_ref() {
            let _ = conn.execute(
                "DELETE FROM entries WHERE path = ?1",
                params![path.to_string_lossy()],
            );
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        if let Some(conn) = self.conn.as_ref() {
            let _ = conn.execute("DELETE FROM entries", []);
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Aggregate hit/miss/stale counts from the durable stats table,
    /// across sessions. Empty when persistence is off or degraded.
    pub fn persisted_event_counts(&self) -> Vec<(String, i64)> {
        let Some(conn) = self.conn.as_ref() else {
            return Vec::new();
        };
        let Ok(mut stmt) = conn.prepare(
            "SELECT event, COUNT(*) as cnt FROM cache_stats
             GROUP BY event ORDER BY cnt DESC",
        ) else {
            return Vec::new();
        };
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)));
        match rows {
            Ok(rows) => rows.flatten().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Flush the WAL at shutdown. Best-effort.
    pub fn dispose(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
        }
    }

    // ── Persistence internals ───────────────────────────────

    fn load_persisted(&mut self, key: &CacheKey) -> Option<CacheEntry> {
        let conn = self.conn.as_ref()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT fingerprint, violations_json FROM entries
                 WHERE path = ?1 AND profile = ?2",
                params![key.path.to_string_lossy(), key.profile],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .unwrap_or_else(|e| {
                self.log_degrade(&e);
                None
            });

        let (fp_hex, json) = row?;
        let fingerprint = Fingerprint::parse(&fp_hex)?;

        match serde_json::from_str::<Vec<Violation>>(&json) {
            Ok(violations) => {
                let now = epoch_secs();
                let _ = conn.execute(
                    "UPDATE entries SET last_accessed_at = ?1 WHERE path = ?2 AND profile = ?3",
                    params![now as i64, key.path.to_string_lossy(), key.profile],
                );
                Some(CacheEntry {
                    fingerprint,
                    violations,
                    persistent: true,
                })
            }
            Err(_) => {
                // Corrupt persisted row: discard, not fatal.
                let _ = conn.execute(
                    "DELETE FROM entries WHERE path = ?1 AND profile = ?2",
                    params![key.path.to_string_lossy(), key.profile],
                );
                None
            }
        }
    }

    fn store_persisted(&mut self, key: &CacheKey, violations: &[Violation], fp: Fingerprint) {
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        let json = match serde_json::to_string(violations) {
            Ok(json) => json,
            Err(_) => return,
        };
        let now = epoch_secs() as i64;

        let result = with_retry(3, || {
            conn.execute(
                "INSERT OR REPLACE INTO entries
                     (path, profile, fingerprint, violations_json, created_at, last_accessed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![
                    key.path.to_string_lossy(),
                    key.profile,
                    fp.to_string(),
                    json,
                    now
                ],
            )
            .context("Failed to upsert cache entry")?;
            Ok(())
        });

        match result {
            Ok(()) => self.prune_persisted(),
            Err(e) => {
                // Treat as cache-miss-forever for this entry: drop the
                // connection so the session continues memory-only.
                if self.verbose > 0 {
                    eprintln!("relint: cache write failed, persistence off: {e:#}");
                }
                self.conn = None;
            }
        }
    }

    fn prune_persisted(&self) {
        let Some(conn) = self.conn.as_ref() else {
            return;
        };
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .unwrap_or(0);
        if count <= self.max_entries as i64 {
            return;
        }
        let remove = count - self.max_entries as i64;
        let _ = conn.execute(
            "DELETE FROM entries WHERE (path, profile) IN
                 (SELECT path, profile FROM entries ORDER BY last_accessed_at ASC LIMIT ?1)",
            params![remove],
        );
    }

    /// Bump last_accessed_at so the LRU prune sees live entries as live.
    fn touch(&self, key: &CacheKey) {
        if let Some(conn) = self.conn.as_ref() {
            let _ = conn.execute(
                "UPDATE entries SET last_accessed_at = ?1 WHERE path = ?2 AND profile = ?3",
                params![epoch_secs() as i64, key.path.to_string_lossy(), key.profile],
            );
        }
    }

    fn record_event(&self, event: &str, path: &Path) {
        if let Some(conn) = self.conn.as_ref() {
            let _ = conn.execute(
                "INSERT INTO cache_stats (event, path, timestamp) VALUES (?1, ?2, ?3)",
                params![event, path.to_string_lossy(), epoch_secs() as i64],
            );
        }
    }

    fn log_degrade(&self, e: &rusqlite::Error) {
        if self.verbose > 0 {
            eprintln!("relint: cache read failed: {e}");
        }
    }
}

// ── Database plumbing ───────────────────────────────────────

/// Resolve the cache database path: explicit > `RELINT_CACHE_DB` > default.
fn cache_db_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    if let Ok(p) = std::env::var("RELINT_CACHE_DB") {
        return PathBuf::from(p);
    }
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("relint")
        .join("cache.db")
}

fn open_cache_db(explicit: Option<&Path>) -> Result<Connection> {
    let path = cache_db_path(explicit);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cache directory {}", parent.display()))?;
    }
    let conn = Connection::open(&path)
        .with_context(|| format!("Failed to open cache db at {}", path.display()))?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA busy_timeout=2500;",
    )
    .context("Failed to configure cache db connection")?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS entries (
            path             TEXT    NOT NULL,
            profile          TEXT    NOT NULL,
            fingerprint      TEXT    NOT NULL,
            violations_json  TEXT    NOT NULL,
            created_at       INTEGER NOT NULL,
            last_accessed_at INTEGER NOT NULL,
            PRIMARY KEY (path, profile)
         );
         CREATE TABLE IF NOT EXISTS cache_stats (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            event     TEXT    NOT NULL,
            path      TEXT    NOT NULL,
            timestamp INTEGER NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_entries_accessed
             ON entries(last_accessed_at);",
    )
    .context("Failed to initialise cache db schema")?;
    Ok(conn)
}

/// Retry wrapper for operations that may hit transient SQLITE_BUSY when
/// another relint process shares the database. Backoff 100/200/400ms.
fn with_retry<T, F: Fn() -> Result<T>>(max_retries: u32, op: F) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(val) => return Ok(val),
            Err(e) => {
                let is_busy = e
                    .chain()
                    .any(|cause| cause.to_string().contains("database is locked"));
                if !is_busy || attempt >= max_retries {
                    return Err(e);
                }
                attempt += 1;
                let backoff_ms = 100 * (1u64 << (attempt - 1));
                std::thread::sleep(std::time::Duration::from_millis(backoff_ms));
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
