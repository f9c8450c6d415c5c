//! Source location tracking for the Velo engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// A line/column pair derived from a byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
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

/// A half-open byte range in one source file.
///
/// Line and column information is not stored; it is derived on demand through
/// a [`LineMap`] built from the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub file_id: u32,
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(file_id: u32, start: u32, end: u32) -> Self {
        Self { file_id, start, end }
    }

    /// A zero-length span at one offset.
    pub fn at(file_id: u32, offset: u32) -> Self {
        Self::new(file_id, offset, offset)
    }

    pub fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// The smallest span covering both `self` and `other`.
    pub fn merge(self, other: Span) -> Span {
        debug_assert_eq!(self.file_id, other.file_id, "cannot merge spans from different files");
        Span::new(self.file_id, self.start.min(other.start), self.end.max(other.end))
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Byte offsets of line starts, for on-demand line/column resolution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LineMap {
    line_starts: Vec<u32>,
}

impl LineMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0u32];
        for (i, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }
        Self { line_starts }
    }

    /// Resolve a byte offset to a 1-based line/column position.
    pub fn position(&self, offset: u32) -> Position {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let column = offset - self.line_starts[line_idx] + 1;
        Position::new(line_idx as u32 + 1, column)
    }

    /// 1-based line number for a byte offset.
    pub fn line(&self, offset: u32) -> u32 {
        self.position(offset).line
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }
}

/// A value with associated source location information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub value: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(value: T, span: Span) -> Self {
        Self { value, span }
    }

    pub fn map<U, F>(self, f: F) -> Spanned<U>
    where
        F: FnOnce(T) -> U,
    {
        Spanned::new(f(self.value), self.span)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_span_merge() {
        let a = Span::new(0, 4, 10);
        let b = Span::new(0, 8, 20);
        assert_eq!(a.merge(b), Span::new(0, 4, 20));
        assert_eq!(b.merge(a), Span::new(0, 4, 20));
    }

    #[test]
    fn test_line_map_positions() {
        let map = LineMap::new("ab\ncd\n\nef");
        assert_eq!(map.position(0), Position::new(1, 1));
        assert_eq!(map.position(1), Position::new(1, 2));
        assert_eq!(map.position(3), Position::new(2, 1));
        assert_eq!(map.position(6), Position::new(3, 1));
        assert_eq!(map.position(7), Position::new(4, 1));
        assert_eq!(map.line_count(), 4);
    }

    #[test]
    fn test_span_contains() {
        let span = Span::new(0, 2, 5);
        assert!(!span.contains(1));
        assert!(span.contains(2));
        assert!(span.contains(4));
        assert!(!span.contains(5));
    }
}
