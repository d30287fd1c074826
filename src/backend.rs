//! Backend dispatch: a ranked list of analysis strategies, tried in priority
//! order. A degraded backend must never block the user from seeing *some*
//! analysis, so every failure short of "all paths exhausted" is silent.
//!
//! Two strategies ship: a persistent service reached over local TCP with a
//! minimal HTTP/1.1 POST (stdlib TcpStream, strict timeouts), and a local
//! process invocation of the engine executable. Both produce engine-shaped
//! findings that are normalized here into the canonical `Violation`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

use crate::violation::{Severity, Violation};

// ── Errors ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum BackendError {
    /// Process failed to start / exited non-zero / service unreachable.
    #[error("backend unavailable: {detail}")]
    Unavailable { detail: String },

    /// Output did not parse into the expected shape. Raw text is kept for
    /// diagnosis and logged, never shown raw to the user.
    #[error("malformed backend output: {detail}")]
    MalformedOutput { detail: String, raw: String },

    /// No response within the bounded wait.
    #[error("backend timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

// ── Requests ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    File,
    Workspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub target: PathBuf,
    pub scope: Scope,
    /// Named policy/profile handed to the engine. Also the cache "kind".
    pub profile: String,
    pub format: OutputFormat,
    pub include_tests: bool,
    pub timeout: Duration,
}

// ── Engine-shaped findings ──────────────────────────────────

/// Tolerant deserialization of one engine finding. Engines disagree on field
/// names; aliases cover the shapes seen in the wild.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFinding {
    #[serde(default, alias = "finding_id")]
    pub id: Option<String>,
    #[serde(default, alias = "rule", alias = "rule_id", alias = "check")]
    pub category: Option<String>,
    #[serde(default, alias = "level")]
    pub severity: Option<String>,
    #[serde(default, alias = "description")]
    pub message: Option<String>,
    #[serde(default, alias = "file", alias = "filename")]
    pub path: Option<PathBuf>,
    #[serde(default, alias = "lineno", alias = "begin_line")]
    pub line: Option<u32>,
    #[serde(default, alias = "col", alias = "begin_column")]
    pub column: Option<u32>,
    #[serde(default)]
    pub weight: Option<u32>,
    #[serde(default, alias = "recommendation")]
    pub suggestion: Option<String>,
}

/// Map engine-specific fields into the canonical shape. Unknown severities
/// default to medium, missing line numbers to 1, missing paths to the
/// request target.
pub fn normalize(findings: Vec<RawFinding>, fallback_path: &Path) -> Vec<Violation> {
    findings
        .into_iter()
        .map(|f| {
            let category = f.category.unwrap_or_else(|| "general".to_string());
            let path = f.path.unwrap_or_else(|| fallback_path.to_path_buf());
            let line = f.line.unwrap_or(1).max(1);
            let id = f
                .id
                .unwrap_or_else(|| format!("{}:{}:{}", category, path.display(), line));
            Violation {
                id,
                category,
                severity: f.severity.as_deref().map(Severity::parse).unwrap_or_default(),
                message: f.message.unwrap_or_default(),
                path,
                line,
                column: f.column,
                weight: f.weight,
                suggestion: f.suggestion,
            }
        })
        .collect()
}

// ── Strategy trait ──────────────────────────────────────────

pub trait AnalysisBackend {
    fn name(&self) -> &str;

    /// Cheap liveness check, consulted before dispatch. Liveness itself is
    /// the collaborator's concern; this only asks.
    fn is_available(&self) -> bool;

    fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawFinding>, BackendError>;
}

// ── Persistent service path ─────────────────────────────────

pub struct ServiceBackend {
    host: String,
    timeout: Duration,
}

impl ServiceBackend {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

#[derive(Serialize)]
struct ServiceRequest<'a> {
    target: &'a Path,
    scope: Scope,
    profile: &'a str,
    format: OutputFormat,
    include_tests: bool,
}

#[derive(Deserialize)]
struct ServiceResponse {
    findings: Vec<RawFinding>,
}

impl AnalysisBackend for ServiceBackend {
    fn name(&self) -> &str {
        "service"
    }

    fn is_available(&self) -> bool {
        let Ok(addr) = self.host.parse::<SocketAddr>() else {
            return false;
        };
        TcpStream::connect_timeout(&addr, self.timeout).is_ok()
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawFinding>, BackendError> {
        let body = serde_json::to_string(&ServiceRequest {
            target: &request.target,
            scope: request.scope,
            profile: &request.profile,
            format: OutputFormat::Json,
            include_tests: request.include_tests,
        })
        .map_err(|e| BackendError::Unavailable {
            detail: format!("request encode failed: {e}"),
        })?;

        let raw = http_post(&self.host, "/analyze", &body, self.timeout)?;
        let response: ServiceResponse =
            serde_json::from_str(&raw).map_err(|e| BackendError::MalformedOutput {
                detail: format!("service response did not parse: {e}"),
                raw,
            })?;
        Ok(response.findings)
    }
}

/// Minimal sync HTTP/1.1 POST over stdlib TcpStream with strict connect,
/// read, and write timeouts. Returns the raw response body.
fn http_post(host: &str, path: &str, body: &str, timeout: Duration) -> Result<String, BackendError> {
    let addr: SocketAddr = host.parse().map_err(|_| BackendError::Unavailable {
        detail: format!("invalid service host: {host}"),
    })?;
    let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(|e| {
        BackendError::Unavailable {
            detail: format!("service connect failed: {e}"),
        }
    })?;
    stream.set_read_timeout(Some(timeout)).ok();
    stream.set_write_timeout(Some(timeout)).ok();

    let request = format!(
        "POST {path} HTTP/1.1\r\nHost: {host}\r\nContent-Type: application/json\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n{body}",
        len = body.len(),
    );
    stream
        .write_all(request.as_bytes())
        .map_err(|e| io_to_backend(e, timeout))?;

    let mut response = String::new();
    stream
        .read_to_string(&mut response)
        .map_err(|e| io_to_backend(e, timeout))?;

    match response.find("\r\n\r\n") {
        Some(pos) => Ok(response[pos + 4..].to_string()),
        None => Err(BackendError::MalformedOutput {
            detail: "no header separator in service response".to_string(),
            raw: response,
        }),
    }
}

fn io_to_backend(e: std::io::Error, timeout: Duration) -> BackendError {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => BackendError::Timeout {
            elapsed_ms: timeout.as_millis() as u64,
        },
        _ => BackendError::Unavailable {
            detail: format!("service i/o failed: {e}"),
        },
    }
}

// ── Local process path ──────────────────────────────────────

pub struct ProcessBackend {
    command: String,
}

impl ProcessBackend {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

impl AnalysisBackend for ProcessBackend {
    fn name(&self) -> &str {
        "process"
    }

    fn is_available(&self) -> bool {
        // Spawn failure is already reported per call; don't probe twice.
        true
    }

    fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<RawFinding>, BackendError> {
        let mut cmd = Command::new(&self.command);
        cmd.arg(&request.target);
        cmd.arg("--format").arg(match request.format {
            OutputFormat::Json => "json",
            OutputFormat::Text => "text",
        });
        cmd.arg("--profile").arg(&request.profile);
        if request.include_tests {
            cmd.arg("--include-tests");
        }

        let output = cmd.output().map_err(|e| BackendError::Unavailable {
            detail: format!("failed to spawn {}: {e}", self.command),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::Unavailable {
                detail: format!(
                    "{} exited with {}: {}",
                    self.command,
                    output.status,
                    stderr.trim()
                ),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        match request.format {
            OutputFormat::Json => parse_json_findings(&stdout),
            OutputFormat::Text => Ok(parse_text_findings(&stdout)),
        }
    }
}

/// Accept either a bare array of findings or a `{"findings": [...]}` wrapper.
fn parse_json_findings(stdout: &str) -> Result<Vec<RawFinding>, BackendError> {
    if let Ok(findings) = serde_json::from_str::<Vec<RawFinding>>(stdout) {
        return Ok(findings);
    }
    serde_json::from_str::<ServiceResponse>(stdout)
        .map(|r| r.findings)
        .map_err(|e| BackendError::MalformedOutput {
            detail: format!("engine stdout did not parse as findings: {e}"),
            raw: stdout.to_string(),
        })
}

/// Line-oriented engine output: `path:line[:col]: SEVERITY[rule] message`.
/// Lines that don't match are skipped, not fatal.
fn parse_text_findings(stdout: &str) -> Vec<RawFinding> {
    static LINE_RE: OnceLock<Regex> = OnceLock::new();
    let line_re = LINE_RE.get_or_init(|| {
        Regex::new(r"^(?P<path>[^:\s][^:]*):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?P<sev>[A-Za-z]+)(?:\[(?P<rule>[^\]]+)\])?\s*(?P<msg>.*)$")
            .expect("invalid LINE_RE")
    });

    stdout
        .lines()
        .filter_map(|line| {
            let caps = line_re.captures(line.trim_end())?;
            Some(RawFinding {
                id: None,
                category: caps.name("rule").map(|m| m.as_str().to_string()),
                severity: caps.name("sev").map(|m| m.as_str().to_string()),
                message: caps.name("msg").map(|m| m.as_str().to_string()),
                path: caps.name("path").map(|m| PathBuf::from(m.as_str())),
                line: caps.name("line").and_then(|m| m.as_str().parse().ok()),
                column: caps.name("col").and_then(|m| m.as_str().parse().ok()),
                weight: None,
                suggestion: None,
            })
        })
        .collect()
}

// ── Dispatcher ──────────────────────────────────────────────

/// Which strategies to rank, from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    /// Service first when connected, process as fallback.
    #[default]
    Auto,
    /// Prefer the persistent service; the process path remains the fallback.
    Service,
    /// Local process only.
    Process,
}

pub struct Dispatcher {
    backends: Vec<Box<dyn AnalysisBackend>>,
    verbose: u8,
}

impl Dispatcher {
    pub fn new(backends: Vec<Box<dyn AnalysisBackend>>, verbose: u8) -> Self {
        Self { backends, verbose }
    }

    pub fn from_selection(
        selection: BackendSelection,
        command: &str,
        service_host: &str,
        service_timeout: Duration,
        verbose: u8,
    ) -> Self {
        let service = || -> Box<dyn AnalysisBackend> {
            Box::new(ServiceBackend::new(service_host, service_timeout))
        };
        let process = || -> Box<dyn AnalysisBackend> { Box::new(ProcessBackend::new(command)) };

        let backends = match selection {
            BackendSelection::Auto | BackendSelection::Service => vec![service(), process()],
            BackendSelection::Process => vec![process()],
        };
        Self::new(backends, verbose)
    }

    /// Try each ranked backend in order; any failure means "try next".
    /// An error surfaces only when every path is exhausted, carrying the
    /// first failure (later ones are logged under -v).
    pub fn analyze(&self, request: &AnalysisRequest) -> Result<Vec<Violation>, BackendError> {
        let mut first_error: Option<BackendError> = None;

        for backend in &self.backends {
            if !backend.is_available() {
                if self.verbose > 0 {
                    eprintln!("relint: backend {} not available, trying next", backend.name());
                }
                if first_error.is_none() {
                    first_error = Some(BackendError::Unavailable {
                        detail: format!("{} reported not connected", backend.name()),
                    });
                }
                continue;
            }

            match backend.analyze(request) {
                Ok(findings) => return Ok(normalize(findings, &request.target)),
                Err(e) => {
                    if self.verbose > 0 {
                        eprintln!("relint: backend {} failed: {e}", backend.name());
                    }
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        Err(first_error.unwrap_or(BackendError::Unavailable {
            detail: "no backends configured".to_string(),
        }))
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn request(target: &str) -> AnalysisRequest {
        AnalysisRequest {
            target: PathBuf::from(target),
            scope: Scope::File,
            profile: "default".into(),
            format: OutputFormat::Json,
            include_tests: false,
            timeout: Duration::from_millis(100),
        }
    }

    struct Scripted {
        name: &'static str,
        available: bool,
        outcome: Result<Vec<RawFinding>, ()>,
        calls: Cell<u32>,
    }

    impl Scripted {
        fn ok(name: &'static str, findings: Vec<RawFinding>) -> Self {
            Self {
                name,
                available: true,
                outcome: Ok(findings),
                calls: Cell::new(0),
            }
        }

        fn failing(name: &'static str) -> Self {
            Self {
                name,
                available: true,
                outcome: Err(()),
                calls: Cell::new(0),
            }
        }

        fn offline(name: &'static str) -> Self {
            Self {
                name,
                available: false,
                outcome: Err(()),
                calls: Cell::new(0),
            }
        }
    }

    impl AnalysisBackend for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn analyze(&self, _request: &AnalysisRequest) -> Result<Vec<RawFinding>, BackendError> {
            self.calls.set(self.calls.get() + 1);
            match &self.outcome {
                Ok(findings) => Ok(findings.clone()),
                Err(()) => Err(BackendError::Unavailable {
                    detail: format!("{} scripted failure", self.name),
                }),
            }
        }
    }

    fn finding(severity: &str, line: Option<u32>) -> RawFinding {
        RawFinding {
            category: Some("naming".into()),
            severity: Some(severity.into()),
            message: Some("bad name".into()),
            line,
            ..RawFinding::default()
        }
    }

    #[test]
    fn normalize_defaults_unknown_severity_to_medium() {
        let vs = normalize(vec![finding("wild-guess", Some(3))], Path::new("a.py"));
        assert_eq!(vs[0].severity, Severity::Medium);
    }

    #[test]
    fn normalize_defaults_missing_line_to_one() {
        let vs = normalize(vec![finding("high", None)], Path::new("a.py"));
        assert_eq!(vs[0].line, 1);
        assert_eq!(vs[0].path, PathBuf::from("a.py"));
    }

    #[test]
    fn normalize_synthesizes_missing_ids() {
        let vs = normalize(vec![finding("high", Some(7))], Path::new("a.py"));
        assert_eq!(vs[0].id, "naming:a.py:7");
    }

    #[test]
    fn raw_finding_accepts_field_aliases() {
        let raw: RawFinding = serde_json::from_str(
            r#"{"rule_id": "W0612", "level": "warning", "description": "unused", "file": "a.py", "lineno": 9}"#,
        )
        .expect("alias parse");
        assert_eq!(raw.category.as_deref(), Some("W0612"));
        assert_eq!(raw.severity.as_deref(), Some("warning"));
        assert_eq!(raw.line, Some(9));
    }

    #[test]
    fn dispatcher_falls_back_on_failure() {
        let dispatcher = Dispatcher::new(
            vec![
                Box::new(Scripted::failing("service")),
                Box::new(Scripted::ok("process", vec![finding("high", Some(2))])),
            ],
            0,
        );
        let vs = dispatcher.analyze(&request("a.py")).expect("fallback succeeds");
        assert_eq!(vs.len(), 1);
        assert_eq!(vs[0].severity, Severity::High);
    }

    #[test]
    fn dispatcher_skips_unavailable_backends_without_calling() {
        let offline = Box::new(Scripted::offline("service"));
        let dispatcher = Dispatcher::new(
            vec![offline, Box::new(Scripted::ok("process", vec![]))],
            0,
        );
        assert!(dispatcher.analyze(&request("a.py")).is_ok());
    }

    #[test]
    fn dispatcher_errors_only_when_all_exhausted() {
        let dispatcher = Dispatcher::new(
            vec![
                Box::new(Scripted::failing("service")),
                Box::new(Scripted::failing("process")),
            ],
            0,
        );
        let err = dispatcher.analyze(&request("a.py")).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
        assert!(err.to_string().contains("service"), "first failure surfaces");
    }

    #[test]
    fn selection_ranks_expected_strategies() {
        let auto = Dispatcher::from_selection(
            BackendSelection::Auto,
            "lint-engine",
            "127.0.0.1:7432",
            Duration::from_millis(50),
            0,
        );
        assert_eq!(auto.backend_names(), vec!["service", "process"]);

        let process_only = Dispatcher::from_selection(
            BackendSelection::Process,
            "lint-engine",
            "127.0.0.1:7432",
            Duration::from_millis(50),
            0,
        );
        assert_eq!(process_only.backend_names(), vec!["process"]);
    }

    #[test]
    fn parse_json_accepts_array_and_wrapper() {
        let array = r#"[{"rule": "x", "severity": "low", "message": "m", "line": 2}]"#;
        assert_eq!(parse_json_findings(array).expect("array form").len(), 1);

        let wrapper = r#"{"findings": [{"rule": "x", "severity": "low", "message": "m"}]}"#;
        assert_eq!(parse_json_findings(wrapper).expect("wrapper form").len(), 1);

        assert!(matches!(
            parse_json_findings("not json at all"),
            Err(BackendError::MalformedOutput { .. })
        ));
    }

    #[test]
    fn parse_text_extracts_location_severity_and_rule() {
        let out = "src/app.py:14:3: HIGH[unused-import] 'os' imported but unused\n\
                   src/app.py:30: MEDIUM long function\n\
                   noise line without a location\n";
        let findings = parse_text_findings(out);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].category.as_deref(), Some("unused-import"));
        assert_eq!(findings[0].line, Some(14));
        assert_eq!(findings[0].column, Some(3));
        assert_eq!(findings[1].category, None);
        assert_eq!(findings[1].severity.as_deref(), Some("MEDIUM"));
    }

    #[cfg(unix)]
    #[test]
    fn process_backend_reports_missing_command_as_unavailable() {
        let backend = ProcessBackend::new("relint-no-such-engine-xyz");
        let err = backend.analyze(&request("a.py")).unwrap_err();
        assert!(matches!(err, BackendError::Unavailable { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn process_backend_reports_garbage_stdout_as_malformed() {
        // `echo` exits 0 and prints its args, which is not findings JSON.
        let backend = ProcessBackend::new("echo");
        let err = backend.analyze(&request("a.py")).unwrap_err();
        assert!(matches!(err, BackendError::MalformedOutput { .. }));
    }

    #[test]
    fn service_backend_unreachable_host_is_unavailable() {
        // Port 1 on localhost is essentially never listening.
        let backend = ServiceBackend::new("127.0.0.1:1", Duration::from_millis(100));
        assert!(!backend.is_available());
        let err = backend.analyze(&request("a.py")).unwrap_err();
        assert!(matches!(
            err,
            BackendError::Unavailable { .. } | BackendError::Timeout { .. }
        ));
    }
}
