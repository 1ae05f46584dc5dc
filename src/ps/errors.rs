use serde::Serialize;
use thiserror::Error;

/// Failure to parse PowerShell source.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    /// Byte offset where parsing stopped
    pub offset: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based column, in characters
    pub column: usize,
}

impl ParseError {
    pub fn at(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        Self {
            message: message.into(),
            offset,
            line,
            column,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn computes_line_and_column() {
        let err = ParseError::at("ab\ncdé\nf", 7, "boom");
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 4);
        assert_eq!(err.to_string(), "boom at line 2, column 4");
    }

    #[test]
    fn clamps_offset_past_end() {
        let err = ParseError::at("x", 10, "eof");
        assert_eq!(err.offset, 1);
        assert_eq!(err.column, 2);
    }
}
