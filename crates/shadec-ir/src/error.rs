//! Diagnostics plumbing shared by every compilation stage.
//!
//! User-facing problems (unresolved names, bad constants, unsupported
//! constructs) are pushed into an [`ErrorReporter`] together with a source
//! [`Location`]; the failing operation then returns [`ErrorReported`]. One
//! reported error fails the whole compile, there is no in-band recovery.

use std::fmt;
use std::sync::Arc;

/// Position in a source file. Line and column are 1-based, `0` means unknown.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Location {
    pub file: Arc<str>,
    pub line: u32,
    pub column: u32,
}

impl Location {
    pub fn new(file: Arc<str>, line: u32, column: u32) -> Self {
        Self { file, line, column }
    }

    /// Location for objects synthesized by the compiler itself.
    pub fn internal() -> Self {
        Self {
            file: Arc::from("<internal>"),
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.file)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

/// Marker error: the details were already handed to an [`ErrorReporter`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("compilation failed, see reported diagnostics")]
pub struct ErrorReported;

/// Sink for compiler diagnostics.
pub trait ErrorReporter {
    fn report_error(&mut self, location: &Location, message: &str);
    fn report_warning(&mut self, location: &Location, message: &str);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Warning => "warning",
        })
    }
}

/// A single collected diagnostic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub location: Location,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.severity, self.message)
    }
}

/// Reporter that keeps every diagnostic in memory, in report order.
#[derive(Clone, Debug, Default)]
pub struct CollectingReporter {
    pub diagnostics: Vec<Diagnostic>,
}

impl CollectingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_errors(&self) -> bool {
        self.errors().next().is_some()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// All error messages joined by newlines, handy in assertions.
    pub fn error_text(&self) -> String {
        self.errors()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ErrorReporter for CollectingReporter {
    fn report_error(&mut self, location: &Location, message: &str) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            location: location.clone(),
            message: message.to_string(),
        });
    }

    fn report_warning(&mut self, location: &Location, message: &str) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            location: location.clone(),
            message: message.to_string(),
        });
    }
}

/// Reporter forwarding to the `log` facade, counting errors.
#[derive(Debug, Default)]
pub struct LogReporter {
    pub error_count: usize,
}

impl ErrorReporter for LogReporter {
    fn report_error(&mut self, location: &Location, message: &str) {
        self.error_count += 1;
        log::error!("{location}: {message}");
    }

    fn report_warning(&mut self, location: &Location, message: &str) {
        log::warn!("{location}: {message}");
    }
}
