//! Post-patch validation.
//!
//! # Hard Rule (Never Violate)
//!
//! After patching, re-parse with the same parser that produced the original
//! tree. If the text no longer parses, the pass is rejected and the document
//! keeps its last good state.

use crate::patch::PatchedSpan;
use crate::ps::{self, ParseError, SyntaxTree};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("patched text no longer parses: {message} at line {}, column {}", location.line, location.column)]
    ParseErrorIntroduced {
        message: String,
        location: ErrorLocation,
    },
}

impl ValidationError {
    pub fn location(&self) -> &ErrorLocation {
        match self {
            ValidationError::ParseErrorIntroduced { location, .. } => location,
        }
    }
}

/// Location of a parse error in the patched text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorLocation {
    pub byte_offset: usize,
    pub line: usize,
    pub column: usize,
    /// Up to 20 bytes either side of the error, newlines escaped
    pub context: String,
}

impl ErrorLocation {
    fn from_parse_error(error: &ParseError, source: &str) -> Self {
        let mut context_start = error.offset.saturating_sub(20);
        while !source.is_char_boundary(context_start) {
            context_start -= 1;
        }
        let mut context_end = (error.offset + 20).min(source.len());
        while !source.is_char_boundary(context_end) {
            context_end += 1;
        }
        let context = source
            .get(context_start..context_end)
            .unwrap_or("")
            .replace('\n', "\\n");
        Self {
            byte_offset: error.offset,
            line: error.line,
            column: error.column,
            context,
        }
    }
}

/// Parse validator for patched PowerShell text.
#[derive(Debug, Default)]
pub struct ParseValidator;

impl ParseValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate that `source` parses, returning the fresh tree.
    pub fn validate(&self, source: &str) -> Result<SyntaxTree, ValidationError> {
        ps::parse(source)
            .map_err(|error| ValidationError::ParseErrorIntroduced {
                location: ErrorLocation::from_parse_error(&error, source),
                message: error.message,
            })
    }
}

/// Validate with a fresh validator.
pub fn validate(source: &str) -> Result<SyntaxTree, ValidationError> {
    ParseValidator::new().validate(source)
}

/// Rules to blame for a parse error at `offset` in patched text.
///
/// Picks the rule(s) whose output span starts closest before the error. When
/// no edit precedes the error every rule in the pass is blamed.
pub fn blame(spans: &[PatchedSpan], offset: usize) -> Vec<String> {
    let nearest = spans
        .iter()
        .filter(|s| s.start <= offset)
        .map(|s| s.start)
        .max();
    let mut rules: Vec<String> = match nearest {
        Some(start) => spans
            .iter()
            .filter(|s| s.start == start)
            .map(|s| s.rule_id.clone())
            .collect(),
        None => spans.iter().map(|s| s.rule_id.clone()).collect(),
    };
    rules.sort();
    rules.dedup();
    rules
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(rule: &str, start: usize, end: usize) -> PatchedSpan {
        PatchedSpan {
            rule_id: rule.to_string(),
            start,
            end,
        }
    }

    #[test]
    fn test_parse_validator_valid() {
        let tree = validate("Get-ChildItem | Where-Object { $_.Length -gt 0 }\n").unwrap();
        assert!(!tree.root().children.is_empty());
    }

    #[test]
    fn test_parse_validator_invalid() {
        let err = validate("if ($x) {\n    Get-Date\n").unwrap_err();
        let location = err.location();
        assert_eq!(location.line, 3);
        assert!(location.context.contains("Get-Date"));
        assert!(err.to_string().contains("missing closing '}'"));
    }

    #[test]
    fn test_context_respects_char_boundaries() {
        let source = format!("$x = 'ééééééééééééé' + {}", "(");
        let err = validate(&source).unwrap_err();
        assert!(err.location().context.ends_with('('));
    }

    #[test]
    fn test_blame_picks_nearest_preceding_edit() {
        let spans = vec![span("A", 0, 3), span("B", 10, 12), span("C", 30, 31)];
        assert_eq!(blame(&spans, 15), vec!["B".to_string()]);
        assert_eq!(blame(&spans, 10), vec!["B".to_string()]);
        assert_eq!(blame(&spans, 40), vec!["C".to_string()]);
    }

    #[test]
    fn test_blame_falls_back_to_every_rule() {
        let spans = vec![span("B", 10, 12), span("A", 20, 22), span("B", 30, 31)];
        assert_eq!(blame(&spans, 2), vec!["A".to_string(), "B".to_string()]);
        assert!(blame(&[], 2).is_empty());
    }
}
