//! Correlates analyzer diagnostics with syntax nodes and rules.

use crate::analyzer::{Diagnostic, Location};
use crate::config::RuleFilter;
use crate::document::SourceDocument;
use crate::ps::SyntaxNode;
use crate::rules::{FixRule, RuleRegistry};
use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

/// Why a diagnostic produced no fix attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// Location outside the text, or no node of an accepted kind there
    Unmappable,
    /// No registered rule has this id
    UnknownRule,
    /// Rule disabled by configuration
    Filtered,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkipReason::Unmappable => "unmappable",
            SkipReason::UnknownRule => "unknown rule",
            SkipReason::Filtered => "filtered",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDiagnostic {
    pub diagnostic: Diagnostic,
    pub reason: SkipReason,
}

/// A diagnostic resolved to the rule and node that will handle it.
pub struct MappedDiagnostic<'a> {
    pub rule: &'a dyn FixRule,
    pub diagnostic: Diagnostic,
    pub node: &'a SyntaxNode,
    pub offset: usize,
}

impl fmt::Debug for MappedDiagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedDiagnostic")
            .field("rule", &self.rule.id())
            .field("node", &self.node.kind)
            .field("offset", &self.offset)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct MappingResult<'a> {
    pub matched: Vec<MappedDiagnostic<'a>>,
    pub skipped: Vec<SkippedDiagnostic>,
}

/// Resolve a diagnostic location to a byte offset in `document`.
///
/// An offset at the very end of the text is pulled back onto the last
/// character so it still falls inside a node.
pub fn resolve_offset(document: &SourceDocument, location: &Location) -> Option<usize> {
    let text = document.text.as_str();
    if text.is_empty() {
        return None;
    }
    let offset = match *location {
        Location::LineColumn { line, column } => document.offset_of(line, column)?,
        Location::Span { start, end } => {
            if start > end || end > text.len() || !text.is_char_boundary(start) {
                return None;
            }
            start
        }
    };
    if offset < text.len() {
        return Some(offset);
    }
    text.char_indices().next_back().map(|(idx, _)| idx)
}

/// Match each diagnostic to a registered, enabled rule and a target node.
pub fn map<'a>(
    document: &'a SourceDocument,
    registry: &'a RuleRegistry,
    filter: &RuleFilter,
    diagnostics: Vec<Diagnostic>,
) -> MappingResult<'a> {
    let mut result = MappingResult::default();
    for diagnostic in diagnostics {
        let Some(rule) = registry.get(&diagnostic.rule_id) else {
            debug!(rule = %diagnostic.rule_id, "no rule registered for diagnostic");
            result.skipped.push(SkippedDiagnostic {
                diagnostic,
                reason: SkipReason::UnknownRule,
            });
            continue;
        };
        if !filter.allows(rule.id()) {
            result.skipped.push(SkippedDiagnostic {
                diagnostic,
                reason: SkipReason::Filtered,
            });
            continue;
        }

        let target = resolve_offset(document, &diagnostic.location).and_then(|offset| {
            rule.matcher(&document.tree, &diagnostic, offset)
                .map(|node| (node, offset))
        });
        match target {
            Some((node, offset)) => result.matched.push(MappedDiagnostic {
                rule,
                diagnostic,
                node,
                offset,
            }),
            None => {
                warn!(
                    document = %document.path,
                    rule = %diagnostic.rule_id,
                    location = ?diagnostic.location,
                    "diagnostic does not map to a syntax node"
                );
                result.skipped.push(SkippedDiagnostic {
                    diagnostic,
                    reason: SkipReason::Unmappable,
                });
            }
        }
    }
    result
}
