//! User-facing log of compile and run events.

use std::time::SystemTime;

use tracing::{error, info, warn};

use crate::diagnostics::{Diagnostic, Severity, SourceLocation};

#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleEntry {
    pub timestamp: SystemTime,
    pub severity: Severity,
    /// Which command produced the entry (`compile`, `run`, `stop`, ...).
    pub tag: String,
    pub message: String,
    pub location: Option<SourceLocation>,
}

/// Append-only list of entries. Every entry is mirrored as a tracing event.
#[derive(Debug, Default, Clone)]
pub struct Console {
    entries: Vec<ConsoleEntry>,
}

impl Console {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        severity: Severity,
        tag: &str,
        message: impl Into<String>,
        location: Option<SourceLocation>,
    ) {
        let message = message.into();
        let at = location.as_ref().map(ToString::to_string).unwrap_or_default();
        match severity {
            Severity::Info => info!(target: "forge::console", tag, at = %at, "{message}"),
            Severity::Warning => warn!(target: "forge::console", tag, at = %at, "{message}"),
            Severity::Error => error!(target: "forge::console", tag, at = %at, "{message}"),
        }
        self.entries.push(ConsoleEntry {
            timestamp: SystemTime::now(),
            severity,
            tag: tag.to_string(),
            message,
            location,
        });
    }

    pub fn info(&mut self, tag: &str, message: impl Into<String>) {
        self.push(Severity::Info, tag, message, None);
    }

    pub fn warn(&mut self, tag: &str, message: impl Into<String>) {
        self.push(Severity::Warning, tag, message, None);
    }

    pub fn error(&mut self, tag: &str, message: impl Into<String>) {
        self.push(Severity::Error, tag, message, None);
    }

    pub fn diagnostic(&mut self, tag: &str, diagnostic: &Diagnostic) {
        self.push(
            diagnostic.severity,
            tag,
            diagnostic.message.clone(),
            diagnostic.location.clone(),
        );
    }

    pub fn entries(&self) -> &[ConsoleEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&ConsoleEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wgsl::source_map::SegmentKind;

    #[test]
    fn entries_keep_attribution() {
        let mut console = Console::new();
        console.info("compile", "ok");
        console.diagnostic(
            "compile",
            &Diagnostic::error(
                "unknown identifier",
                Some(SourceLocation {
                    kind: SegmentKind::Shader,
                    id: "s1".into(),
                    name: "Compute1".into(),
                    line: 3,
                    column: 5,
                }),
            ),
        );
        assert_eq!(console.len(), 2);
        let last = console.last().unwrap();
        assert_eq!(last.severity, Severity::Error);
        assert_eq!(last.location.as_ref().map(|l| l.line), Some(3));
        assert!(console.entries()[0].timestamp <= last.timestamp);

        console.clear();
        assert!(console.is_empty());
    }
}
