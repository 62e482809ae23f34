//! Diagnostic collection for a single validation attempt.
//!
//! libxml2 reports problems through a structured error callback. Every message
//! lands in one of three severity buckets of a [`DiagnosticCollector`]; once the
//! attempt is over the collector is frozen into a [`DiagnosticReport`] that can
//! be attached to a [`crate::ValidationError`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Severity of an engine message, in rendering order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

impl Severity {
    /// All severities, in the order buckets are rendered.
    pub const ALL: [Severity; 3] = [Severity::Warning, Severity::Error, Severity::Fatal];

    /// Map a libxml2 `xmlErrorLevel` to a severity.
    ///
    /// `XML_ERR_NONE` (0) and unknown levels carry nothing worth reporting.
    pub fn from_libxml2_level(level: i32) -> Option<Self> {
        match level {
            1 => Some(Severity::Warning),
            2 => Some(Severity::Error),
            3 => Some(Severity::Fatal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message reported by the parser or a validation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            file: None,
            line: None,
        }
    }

    pub fn with_location(mut self, file: Option<String>, line: Option<u32>) -> Self {
        self.file = file;
        self.line = line;
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{}:{}: {}", file, line, self.message),
            (None, Some(line)) => write!(f, "line {}: {}", line, self.message),
            _ => f.write_str(&self.message),
        }
    }
}

type Buckets = BTreeMap<Severity, Vec<Diagnostic>>;

fn empty_buckets() -> Buckets {
    Severity::ALL
        .into_iter()
        .map(|severity| (severity, Vec::new()))
        .collect()
}

/// Mutable sink for one validation attempt.
///
/// All three buckets exist from construction on, even when empty.
#[derive(Debug)]
pub struct DiagnosticCollector {
    buckets: Buckets,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self {
            buckets: empty_buckets(),
        }
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        self.buckets
            .entry(diagnostic.severity)
            .or_default()
            .push(diagnostic);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Warning, message));
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Error, message));
    }

    pub fn fatal(&mut self, message: impl Into<String>) {
        self.record(Diagnostic::new(Severity::Fatal, message));
    }

    /// First error or fatal message, in the order the engine reported them
    /// within each bucket (fatal first, since it is what stopped the parser).
    pub fn first_failure(&self) -> Option<&Diagnostic> {
        self.buckets[&Severity::Fatal]
            .first()
            .or_else(|| self.buckets[&Severity::Error].first())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Diagnostic> {
        self.buckets.values_mut().flat_map(|bucket| bucket.iter_mut())
    }

    /// Copy the current contents into an immutable report.
    pub fn snapshot(&self) -> DiagnosticReport {
        DiagnosticReport {
            buckets: self.buckets.clone(),
        }
    }

    pub fn into_report(self) -> DiagnosticReport {
        DiagnosticReport {
            buckets: self.buckets,
        }
    }
}

impl Default for DiagnosticCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen diagnostics of a finished validation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiagnosticReport {
    buckets: Buckets,
}

impl DiagnosticReport {
    pub fn empty() -> Self {
        Self {
            buckets: empty_buckets(),
        }
    }

    pub fn bucket(&self, severity: Severity) -> &[Diagnostic] {
        self.buckets
            .get(&severity)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn warnings(&self) -> &[Diagnostic] {
        self.bucket(Severity::Warning)
    }

    pub fn errors(&self) -> &[Diagnostic] {
        self.bucket(Severity::Error)
    }

    pub fn fatals(&self) -> &[Diagnostic] {
        self.bucket(Severity::Fatal)
    }

    /// Whether the engine reported anything at error level or above.
    pub fn has_errors(&self) -> bool {
        !self.errors().is_empty() || !self.fatals().is_empty()
    }

    /// All diagnostics: warnings, then errors, then fatal errors.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        Severity::ALL
            .into_iter()
            .flat_map(move |severity| self.bucket(severity).iter())
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.iter().any(|diagnostic| diagnostic.message.contains(needle))
    }
}

impl Default for DiagnosticReport {
    fn default() -> Self {
        Self::empty()
    }
}

/// One diagnostic per line, warnings first.
impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, diagnostic) in self.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}
