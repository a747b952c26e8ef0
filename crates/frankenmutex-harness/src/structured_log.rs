//! Structured JSONL logging for conformance and probe runs.
//!
//! - [`LogEntry`]: one JSONL record, four required fields plus optional
//!   mutex context (mode, mutex kind, operation, errno, timing).
//! - [`LogEmitter`]: writes records with sequential `<bead>::<run>::<seq>`
//!   trace ids.
//! - [`ArtifactIndex`]: lists the files a run produced with their SHA-256.
//! - [`validate_log_line`] / [`validate_log_file`]: schema checks.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::HarnessError;

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const MODES: [&str; 3] = ["strict", "hardened", "off"];
const OUTCOMES: [&str; 4] = ["pass", "fail", "skip", "model_only"];
const STREAMS: [&str; 3] = ["unit", "conformance", "probe"];
const MUTEX_KINDS: [&str; 4] = ["normal", "recursive", "errorcheck", "default"];

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Result of one checked case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pass,
    Fail,
    Skip,
    /// The cell was checked against the model only (the real call never returns).
    ModelOnly,
}

/// Which workflow produced the entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Unit,
    Conformance,
    Probe,
}

/// One structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub trace_id: String,
    pub level: LogLevel,
    pub event: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bead_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamKind>,
    /// Runtime safety level (`strict`, `hardened`, `off`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mutex_kind: Option<String>,
    /// Operation under test, e.g. `lock` or `fm_pthread_mutex_trylock`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ns: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_refs: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Entry with only the required fields set.
    #[must_use]
    pub fn new(trace_id: impl Into<String>, level: LogLevel, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: trace_id.into(),
            level,
            event: event.into(),
            bead_id: None,
            stream: None,
            mode: None,
            mutex_kind: None,
            symbol: None,
            old_state: None,
            new_state: None,
            outcome: None,
            errno: None,
            latency_ns: None,
            duration_ms: None,
            artifact_refs: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_bead(mut self, bead_id: impl Into<String>) -> Self {
        self.bead_id = Some(bead_id.into());
        self
    }

    #[must_use]
    pub fn with_stream(mut self, stream: StreamKind) -> Self {
        self.stream = Some(stream);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: impl Into<String>) -> Self {
        self.mode = Some(mode.into());
        self
    }

    #[must_use]
    pub fn with_mutex_kind(mut self, kind: impl Into<String>) -> Self {
        self.mutex_kind = Some(kind.into());
        self
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    /// Record a state transition observed by a contract check.
    #[must_use]
    pub fn with_transition(
        mut self,
        old_state: impl Into<String>,
        new_state: impl Into<String>,
    ) -> Self {
        self.old_state = Some(old_state.into());
        self.new_state = Some(new_state.into());
        self
    }

    #[must_use]
    pub fn with_outcome(mut self, outcome: Outcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[must_use]
    pub fn with_errno(mut self, errno: i32) -> Self {
        self.errno = Some(errno);
        self
    }

    #[must_use]
    pub fn with_latency_ns(mut self, ns: u64) -> Self {
        self.latency_ns = Some(ns);
        self
    }

    #[must_use]
    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    #[must_use]
    pub fn with_artifacts(mut self, refs: Vec<String>) -> Self {
        self.artifact_refs = Some(refs);
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Artifact index
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// Files produced by one run, with integrity digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub index_version: u32,
    pub run_id: String,
    pub bead_id: String,
    pub generated_utc: String,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactIndex {
    #[must_use]
    pub fn new(run_id: impl Into<String>, bead_id: impl Into<String>) -> Self {
        Self {
            index_version: 1,
            run_id: run_id.into(),
            bead_id: bead_id.into(),
            generated_utc: now_utc(),
            artifacts: Vec::new(),
        }
    }

    /// Add an entry whose digest is already known.
    pub fn add(
        &mut self,
        path: impl Into<String>,
        kind: impl Into<String>,
        sha256: impl Into<String>,
    ) -> &mut Self {
        self.artifacts.push(ArtifactEntry {
            path: path.into(),
            kind: kind.into(),
            sha256: sha256.into(),
            size_bytes: None,
        });
        self
    }

    /// Hash `file` and add it. The recorded path is relative to `root` when
    /// `file` lives under it.
    pub fn add_file(
        &mut self,
        root: &Path,
        file: &Path,
        kind: impl Into<String>,
    ) -> Result<&mut Self, HarnessError> {
        let data = std::fs::read(file).map_err(|source| HarnessError::io(file, source))?;
        let recorded = file.strip_prefix(root).unwrap_or(file);
        self.artifacts.push(ArtifactEntry {
            path: recorded.to_string_lossy().into_owned(),
            kind: kind.into(),
            sha256: sha256_hex(&data),
            size_bytes: u64::try_from(data.len()).ok(),
        });
        Ok(self)
    }

    /// Re-hash every entry under `root` and return the paths whose content
    /// no longer matches (or can no longer be read).
    #[must_use]
    pub fn stale_entries(&self, root: &Path) -> Vec<String> {
        self.artifacts
            .iter()
            .filter(|entry| match std::fs::read(root.join(&entry.path)) {
                Ok(data) => !sha256_hex(&data).eq_ignore_ascii_case(&entry.sha256),
                Err(_) => true,
            })
            .map(|entry| entry.path.clone())
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Writes [`LogEntry`] lines to a file or an in-memory buffer.
pub struct LogEmitter {
    writer: Box<dyn Write>,
    seq: u64,
    bead_id: String,
    run_id: String,
}

impl LogEmitter {
    pub fn to_file(path: &Path, bead_id: &str, run_id: &str) -> Result<Self, HarnessError> {
        let file = std::fs::File::create(path).map_err(|source| HarnessError::io(path, source))?;
        Ok(Self::with_writer(
            Box::new(std::io::BufWriter::new(file)),
            bead_id,
            run_id,
        ))
    }

    /// Emitter that discards its output; useful when only the returned
    /// entries matter.
    #[must_use]
    pub fn to_sink(bead_id: &str, run_id: &str) -> Self {
        Self::with_writer(Box::new(std::io::sink()), bead_id, run_id)
    }

    #[must_use]
    pub fn with_writer(writer: Box<dyn Write>, bead_id: &str, run_id: &str) -> Self {
        Self {
            writer,
            seq: 0,
            bead_id: bead_id.to_string(),
            run_id: run_id.to_string(),
        }
    }

    /// Next `<bead>::<run>::<seq>` id.
    pub fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{}::{:03}", self.bead_id, self.run_id, self.seq)
    }

    /// Emit a bare entry with a generated trace id.
    pub fn emit(&mut self, level: LogLevel, event: &str) -> Result<LogEntry, HarnessError> {
        let entry = LogEntry::new(self.next_trace_id(), level, event);
        self.emit_entry(entry)
    }

    /// Emit `entry`, filling in the trace id and bead when absent.
    pub fn emit_entry(&mut self, mut entry: LogEntry) -> Result<LogEntry, HarnessError> {
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        if entry.bead_id.is_none() {
            entry.bead_id = Some(self.bead_id.clone());
        }
        let line = entry.to_jsonl()?;
        writeln!(self.writer, "{line}").map_err(HarnessError::Write)?;
        Ok(entry)
    }

    pub fn flush(&mut self) -> Result<(), HarnessError> {
        self.writer.flush().map_err(HarnessError::Write)
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// One schema violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogValidationError {
    pub line_number: usize,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for LogValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "line {}: field '{}': {}",
            self.line_number, self.field, self.message
        )
    }
}

fn check_enum(
    obj: &serde_json::Map<String, serde_json::Value>,
    field: &str,
    allowed: &[&str],
    line_number: usize,
    errors: &mut Vec<LogValidationError>,
) {
    if let Some(value) = obj.get(field).and_then(|v| v.as_str())
        && !allowed.contains(&value)
    {
        errors.push(LogValidationError {
            line_number,
            field: field.to_string(),
            message: format!("invalid {field}: '{value}'"),
        });
    }
}

/// Validate one JSONL line and return the parsed entry.
pub fn validate_log_line(
    line: &str,
    line_number: usize,
) -> Result<LogEntry, Vec<LogValidationError>> {
    let fail = |field: &str, message: String| {
        vec![LogValidationError {
            line_number,
            field: field.to_string(),
            message,
        }]
    };

    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| fail("<json>", format!("invalid JSON: {e}")))?;
    let Some(obj) = value.as_object() else {
        return Err(fail("<root>", "expected JSON object".to_string()));
    };

    let mut errors = Vec::new();
    for field in ["timestamp", "trace_id", "level", "event"] {
        if !obj.contains_key(field) {
            errors.push(LogValidationError {
                line_number,
                field: field.to_string(),
                message: "required field missing".to_string(),
            });
        }
    }

    check_enum(obj, "level", &LEVELS, line_number, &mut errors);
    check_enum(obj, "mode", &MODES, line_number, &mut errors);
    check_enum(obj, "outcome", &OUTCOMES, line_number, &mut errors);
    check_enum(obj, "stream", &STREAMS, line_number, &mut errors);
    check_enum(obj, "mutex_kind", &MUTEX_KINDS, line_number, &mut errors);

    if let Some(trace_id) = obj.get("trace_id").and_then(|v| v.as_str())
        && trace_id.split("::").count() < 3
    {
        errors.push(LogValidationError {
            line_number,
            field: "trace_id".to_string(),
            message: format!("expected <bead>::<run>::<seq>, got '{trace_id}'"),
        });
    }

    // A failed case must point at something a reader can open.
    if obj.get("outcome").and_then(|v| v.as_str()) == Some("fail")
        && !obj
            .get("artifact_refs")
            .and_then(|v| v.as_array())
            .is_some_and(|refs| !refs.is_empty())
    {
        errors.push(LogValidationError {
            line_number,
            field: "artifact_refs".to_string(),
            message: "failed cases must reference at least one artifact".to_string(),
        });
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    serde_json::from_value::<LogEntry>(value)
        .map_err(|e| fail("<deserialization>", format!("failed to deserialize: {e}")))
}

/// Validate every non-empty line of a JSONL file.
///
/// Returns the number of records checked and all violations found.
pub fn validate_log_file(path: &Path) -> Result<(usize, Vec<LogValidationError>), HarnessError> {
    let content = std::fs::read_to_string(path).map_err(|source| HarnessError::io(path, source))?;
    let mut all_errors = Vec::new();
    let mut line_count = 0;

    for (i, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        line_count += 1;
        if let Err(errs) = validate_log_line(line, i + 1) {
            all_errors.extend(errs);
        }
    }

    Ok((line_count, all_errors))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Current time as `YYYY-MM-DDTHH:MM:SS.mmmZ`.
#[must_use]
pub fn now_utc() -> String {
    let since_epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format_utc(since_epoch.as_secs(), since_epoch.subsec_millis())
}

fn format_utc(secs: u64, millis: u32) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{millis:03}Z",
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
    )
}

/// Proleptic Gregorian date for a day count since 1970-01-01.
fn civil_from_days(days: u64) -> (u64, u64, u64) {
    let z = days + 719_468;
    let era = z / 146_097;
    let doe = z % 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + u64::from(month <= 2);
    (year, month, day)
}
