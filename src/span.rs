//! Source location tracking
//!
//! Tokens carry both a byte span (for diagnostics rendered against the source)
//! and a line/column position (for the plain error messages every stage prints).

use std::fmt;

/// A position in the source code (line and column, both 1-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Position {
    /// Line number (1-indexed)
    pub line: u32,
    /// Column number (1-indexed, counted in characters)
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A span representing a range in the source code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Span {
    /// Start position (byte offset)
    pub start: usize,
    /// End position (byte offset, exclusive)
    pub end: usize,
}

impl Span {
    /// Create a new span
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Create an empty span at a single offset
    pub fn point(pos: usize) -> Self {
        Self { start: pos, end: pos }
    }

    /// Merge two spans into one that covers both
    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl From<Span> for miette::SourceSpan {
    fn from(span: Span) -> Self {
        miette::SourceSpan::new(span.start.into(), span.end - span.start)
    }
}

/// Maps byte offsets to line/column positions.
#[derive(Debug, Clone)]
pub struct LineIndex<'src> {
    source: &'src str,
    /// Byte offset of the first character of every line
    line_starts: Vec<usize>,
}

impl<'src> LineIndex<'src> {
    pub fn new(source: &'src str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .char_indices()
                .filter(|&(_, c)| c == '\n')
                .map(|(i, _)| i + 1),
        );
        Self { source, line_starts }
    }

    /// Position of the character starting at `offset`.
    pub fn position(&self, offset: usize) -> Position {
        let offset = offset.min(self.source.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let line_start = self.line_starts[line];
        let column = self.source[line_start..offset].chars().count() + 1;
        Position::new(line as u32 + 1, column as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_merge() {
        let a = Span::new(0, 5);
        let b = Span::new(3, 10);
        let merged = a.merge(b);
        assert_eq!(merged.start, 0);
        assert_eq!(merged.end, 10);
    }

    #[test]
    fn test_span_to_source_span() {
        let source_span: miette::SourceSpan = Span::new(4, 9).into();
        assert_eq!(source_span.offset(), 4);
        assert_eq!(source_span.len(), 5);
    }

    #[test]
    fn test_line_index_positions() {
        let source = "let a = 1;\n  a = 2;\n";
        let index = LineIndex::new(source);
        assert_eq!(index.position(0), Position::new(1, 1));
        assert_eq!(index.position(4), Position::new(1, 5));
        assert_eq!(index.position(11), Position::new(2, 1));
        assert_eq!(index.position(13), Position::new(2, 3));
        // End of input lands on the line after the trailing newline
        assert_eq!(index.position(source.len()), Position::new(3, 1));
    }

    #[test]
    fn test_line_index_counts_characters_not_bytes() {
        let source = "é@";
        let index = LineIndex::new(source);
        assert_eq!(index.position(2), Position::new(1, 2));
    }
}
