//! Line ranges of composed WGSL, attributed to the fragment they came from.

use std::fmt;

use crate::diagnostics::SourceLocation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Shader,
    Function,
    System,
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SegmentKind::Shader => "shader",
            SegmentKind::Function => "function",
            SegmentKind::System => "system",
        })
    }
}

/// `start_line..=end_line`, 1-based, in composed-text line numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub id: String,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

impl Segment {
    pub fn contains(&self, line: usize) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }

    pub fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    segments: Vec<Segment>,
}

impl SourceMap {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub(crate) fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Segment covering a composed line. Segments never overlap.
    pub fn segment_at(&self, line: usize) -> Option<&Segment> {
        self.segments.iter().find(|s| s.contains(line))
    }

    pub fn segment_for(&self, id: &str) -> Option<&Segment> {
        self.segments.iter().find(|s| s.id == id)
    }

    /// Map a composed `(line, column)` back onto its fragment.
    pub fn resolve(&self, line: usize, column: usize) -> Option<SourceLocation> {
        let segment = self.segment_at(line)?;
        Some(SourceLocation {
            kind: segment.kind,
            id: segment.id.clone(),
            name: segment.name.clone(),
            line: line - segment.start_line + 1,
            column,
        })
    }

    /// Composed line number of a fragment-local line.
    pub fn composed_line(&self, id: &str, local_line: usize) -> Option<usize> {
        let segment = self.segment_for(id)?;
        let line = segment.start_line + local_line.checked_sub(1)?;
        segment.contains(line).then_some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> SourceMap {
        let mut map = SourceMap::default();
        map.push(Segment {
            kind: SegmentKind::Function,
            id: "f".into(),
            name: "Library 1".into(),
            start_line: 2,
            end_line: 4,
        });
        map.push(Segment {
            kind: SegmentKind::Shader,
            id: "s".into(),
            name: "Compute1".into(),
            start_line: 10,
            end_line: 15,
        });
        map
    }

    #[test]
    fn resolves_local_line() {
        let loc = map().resolve(12, 7).unwrap();
        assert_eq!(loc.id, "s");
        assert_eq!(loc.line, 3);
        assert_eq!(loc.column, 7);
    }

    #[test]
    fn glue_lines_are_unattributed() {
        assert!(map().resolve(1, 1).is_none());
        assert!(map().resolve(5, 1).is_none());
    }

    #[test]
    fn composed_line_inverts_resolve() {
        let map = map();
        assert_eq!(map.composed_line("f", 3), Some(4));
        assert_eq!(map.composed_line("f", 4), None);
        assert_eq!(map.composed_line("f", 0), None);
    }
}
