//! Compiler and pre-check diagnostics, optionally attributed to a fragment.

use std::fmt;

use crate::wgsl::source_map::SegmentKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

/// A position inside one user fragment. `line` is local to the fragment (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub kind: SegmentKind,
    pub id: String,
    pub name: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}:{}", self.kind, self.name, self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn new(
        severity: Severity,
        message: impl Into<String>,
        location: Option<SourceLocation>,
    ) -> Self {
        Self {
            severity,
            message: message.into(),
            location,
        }
    }

    pub fn error(message: impl Into<String>, location: Option<SourceLocation>) -> Self {
        Self::new(Severity::Error, message, location)
    }

    pub fn unattributed(severity: Severity, message: impl Into<String>) -> Self {
        Self::new(severity, message, None)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{} [{}]: {}", self.severity, loc, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

/// `true` when any diagnostic in the list blocks compilation.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
