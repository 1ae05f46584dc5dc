//! Unified diffs and per-rule statistics for a finished run.

use serde::Serialize;
use similar::{Algorithm, TextDiff};
use std::collections::BTreeMap;

/// Counts for one rule across a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    /// Edits that landed in committed passes
    pub applied: usize,
    /// Edits that lost a conflict
    pub deferred: usize,
    /// Diagnostics that never reached the transform
    pub skipped: usize,
    /// Transforms that errored, panicked or emitted unusable edits
    pub failed: usize,
}

impl RuleStats {
    pub fn is_empty(&self) -> bool {
        *self == RuleStats::default()
    }
}

/// Outcome of one document as a reviewable change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub document_id: String,
    pub unified_diff: String,
    pub changed: bool,
    /// Keyed by rule id, sorted for stable output
    pub rule_stats: BTreeMap<String, RuleStats>,
}

impl DiffReport {
    pub fn new(
        document_id: &str,
        original: &str,
        modified: &str,
        rule_stats: BTreeMap<String, RuleStats>,
    ) -> Self {
        Self {
            document_id: document_id.to_string(),
            unified_diff: unified_diff(document_id, original, modified),
            changed: original != modified,
            rule_stats,
        }
    }

    pub fn total_applied(&self) -> usize {
        self.rule_stats.values().map(|s| s.applied).sum()
    }
}

/// Myers line diff with three lines of context; empty when nothing changed.
pub fn unified_diff(document_id: &str, original: &str, modified: &str) -> String {
    if original == modified {
        return String::new();
    }
    TextDiff::configure()
        .algorithm(Algorithm::Myers)
        .diff_lines(original, modified)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{document_id}"), &format!("b/{document_id}"))
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_text_has_empty_diff() {
        let report = DiffReport::new("t.ps1", "Get-Date\n", "Get-Date\n", BTreeMap::new());
        assert!(!report.changed);
        assert!(report.unified_diff.is_empty());
    }

    #[test]
    fn diff_has_headers_and_hunks() {
        let diff = unified_diff("scripts/t.ps1", "gci\nGet-Date\n", "Get-ChildItem\nGet-Date\n");
        assert!(diff.starts_with("--- a/scripts/t.ps1\n+++ b/scripts/t.ps1\n"));
        assert!(diff.contains("\n-gci\n"));
        assert!(diff.contains("\n+Get-ChildItem\n"));
        assert!(diff.contains("\n Get-Date\n"));
    }

    #[test]
    fn diff_is_deterministic() {
        let original = "a\nb\nc\nd\ne\nf\ng\nh\n";
        let modified = "a\nB\nc\nd\ne\nf\nG\nh\n";
        assert_eq!(
            unified_diff("x", original, modified),
            unified_diff("x", original, modified)
        );
    }

    #[test]
    fn totals_sum_applied_edits() {
        let mut stats = BTreeMap::new();
        stats.insert(
            "A".to_string(),
            RuleStats {
                applied: 2,
                ..RuleStats::default()
            },
        );
        stats.insert(
            "B".to_string(),
            RuleStats {
                applied: 1,
                failed: 1,
                ..RuleStats::default()
            },
        );
        let report = DiffReport::new("t", "x", "y", stats);
        assert_eq!(report.total_applied(), 3);
        assert!(report.changed);
    }
}
