//! Source documents and line/column bookkeeping.

use crate::ps::{self, ParseError, SyntaxTree};
use std::ops::Range;

/// Byte offsets of every line start, for line/column conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            line_starts,
            len: text.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Byte range of a 1-based line, excluding its terminator.
    pub fn line_range(&self, text: &str, line: usize) -> Option<Range<usize>> {
        let start = *self.line_starts.get(line.checked_sub(1)?)?;
        let end = self
            .line_starts
            .get(line)
            .map(|next| next - 1)
            .unwrap_or(self.len);
        let end = if text[start..end].ends_with('\r') {
            end - 1
        } else {
            end
        };
        Some(start..end)
    }

    /// Byte offset for a 1-based line and 1-based character column.
    ///
    /// A column one past the last character addresses the end of the line.
    pub fn offset(&self, text: &str, line: usize, column: usize) -> Option<usize> {
        let range = self.line_range(text, line)?;
        let column = column.checked_sub(1)?;
        let line_text = &text[range.clone()];
        match line_text.char_indices().nth(column) {
            Some((idx, _)) => Some(range.start + idx),
            None if column == line_text.chars().count() => Some(range.end),
            None => None,
        }
    }

    /// 1-based line and character column of a byte offset.
    pub fn position(&self, text: &str, offset: usize) -> (usize, usize) {
        let offset = offset.min(self.len);
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let line_start = self.line_starts[line_idx];
        let column = text
            .get(line_start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(offset - line_start);
        (line_idx + 1, column + 1)
    }
}

/// Immutable snapshot of one script: its text, tree and line index.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Logical id, usually the file path
    pub path: String,
    pub text: String,
    pub tree: SyntaxTree,
    pub lines: LineIndex,
}

impl SourceDocument {
    /// Parse `text` into a new document.
    pub fn parse(path: impl Into<String>, text: impl Into<String>) -> Result<Self, ParseError> {
        let text = text.into();
        let tree = ps::parse(&text)?;
        Ok(Self::from_parts(path.into(), text, tree))
    }

    /// Build a document from text that has already been parsed.
    pub fn from_parts(path: String, text: String, tree: SyntaxTree) -> Self {
        let lines = LineIndex::new(&text);
        Self {
            path,
            text,
            tree,
            lines,
        }
    }

    pub fn offset_of(&self, line: usize, column: usize) -> Option<usize> {
        self.lines.offset(&self.text, line, column)
    }

    pub fn position_of(&self, offset: usize) -> (usize, usize) {
        self.lines.position(&self.text, offset)
    }

    pub fn line_range(&self, line: usize) -> Option<Range<usize>> {
        self.lines.line_range(&self.text, line)
    }

    pub fn slice(&self, range: Range<usize>) -> Option<&str> {
        self.text.get(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_and_position_round_trip_on_multibyte_lines() {
        let text = "Get-Date\r\n$é = 'x'\n";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 3);
        let offset = index.offset(text, 2, 3).unwrap();
        assert_eq!(&text[offset..offset + 1], " ");
        assert_eq!(index.position(text, offset), (2, 3));
    }

    #[test]
    fn line_range_strips_carriage_return() {
        let text = "a  \r\nb";
        let index = LineIndex::new(text);
        assert_eq!(&text[index.line_range(text, 1).unwrap()], "a  ");
        assert_eq!(&text[index.line_range(text, 2).unwrap()], "b");
        assert!(index.line_range(text, 3).is_none());
        assert!(index.line_range(text, 0).is_none());
    }

    #[test]
    fn out_of_range_columns_are_rejected() {
        let text = "abc\n";
        let index = LineIndex::new(text);
        assert_eq!(index.offset(text, 1, 4), Some(3));
        assert_eq!(index.offset(text, 1, 5), None);
        assert_eq!(index.offset(text, 1, 0), None);
        assert_eq!(index.offset(text, 9, 1), None);
    }

    #[test]
    fn document_parse_failure_surfaces() {
        assert!(SourceDocument::parse("x.ps1", "if (").is_err());
        let doc = SourceDocument::parse("x.ps1", "Get-Date\n").unwrap();
        assert_eq!(doc.position_of(4), (1, 5));
    }
}
