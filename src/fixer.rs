//! The convergence loop.
//!
//! One run takes a document from its original text to a fixed point:
//!
//! ```text
//! Detect ─▶ Map ─▶ Transform ─▶ Schedule ─▶ Patch ─▶ Validate ─▶ Commit ─┐
//!   ▲                              │                    │                │
//!   │                    no edits: Converged     fail: stop / roll back   │
//!   └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Passes are strictly sequential. A pass is committed only after the patched
//! text re-parses and the original text is backed up, so a run can always
//! fall back to either the last committed text or the original.

use crate::analyzer::{Analyzer, AnalyzerError};
use crate::backup::{BackupManager, BackupStore};
use crate::config::FixerConfig;
use crate::diff::{DiffReport, RuleStats};
use crate::document::SourceDocument;
use crate::engine;
use crate::mapper::{self, SkippedDiagnostic};
use crate::patch::patch;
use crate::ps::ParseError;
use crate::rules::{FixContext, RuleRegistry};
use crate::schedule::schedule;
use crate::validate::{blame, ErrorLocation, ParseValidator};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation shared between a driver and its runs.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a run left the document exactly as it was.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum RollbackReason {
    /// The first pass produced text that does not parse
    Validation {
        rules: Vec<String>,
        message: String,
        location: ErrorLocation,
    },
    AnalyzerTimeout { message: String },
    Analyzer { message: String },
    Patch { message: String },
    Backup { message: String },
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum FixStatus {
    /// A pass produced no edits
    Converged,
    MaxIterationsExceeded,
    /// A later pass failed validation; the last committed text is kept
    ValidationStopped { iteration: usize, rules: Vec<String> },
    RolledBack { reason: RollbackReason },
    ParseFailure { error: ParseError },
    Cancelled { committed_passes: usize },
}

impl FixStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FixStatus::Converged => "converged",
            FixStatus::MaxIterationsExceeded => "max-iterations-exceeded",
            FixStatus::ValidationStopped { .. } => "validation-stopped",
            FixStatus::RolledBack { .. } => "rolled-back",
            FixStatus::ParseFailure { .. } => "parse-failure",
            FixStatus::Cancelled { .. } => "cancelled",
        }
    }

    /// Whether the final text can be trusted as a complete fix.
    pub fn is_success(&self) -> bool {
        matches!(self, FixStatus::Converged)
    }
}

/// A rule transform that lost its contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleFailure {
    pub iteration: usize,
    pub rule_id: String,
    pub message: String,
}

/// Everything a caller needs to know about one run.
#[derive(Debug, Clone, Serialize)]
pub struct FixOutcome {
    pub document_id: String,
    pub status: FixStatus,
    #[serde(skip)]
    pub original_text: String,
    #[serde(skip)]
    pub final_text: String,
    /// Passes started, including the final zero-edit pass
    pub iterations: usize,
    pub committed_passes: usize,
    pub report: DiffReport,
    pub skipped: Vec<SkippedDiagnostic>,
    pub failures: Vec<RuleFailure>,
    pub backup_written: bool,
}

impl FixOutcome {
    pub fn changed(&self) -> bool {
        self.final_text != self.original_text
    }
}

/// Per-run bookkeeping, turned into a [`FixOutcome`] at the end.
struct RunState {
    stats: BTreeMap<String, RuleStats>,
    skipped: Vec<SkippedDiagnostic>,
    failures: Vec<RuleFailure>,
    iterations: usize,
    committed_passes: usize,
}

impl RunState {
    fn stats(&mut self, rule_id: &str) -> &mut RuleStats {
        self.stats.entry(rule_id.to_string()).or_default()
    }
}

/// Drives documents to a fixed point with a shared rule registry.
pub struct Fixer {
    registry: Arc<RuleRegistry>,
    config: FixerConfig,
    validator: ParseValidator,
}

impl Fixer {
    pub fn new(registry: Arc<RuleRegistry>, config: FixerConfig) -> Self {
        Self {
            registry,
            config,
            validator: ParseValidator::new(),
        }
    }

    pub fn config(&self) -> &FixerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Fix `text` until no rule has anything left to change.
    pub fn run(
        &self,
        document_id: &str,
        text: &str,
        analyzer: &dyn Analyzer,
        backups: &dyn BackupStore,
        cancel: &CancellationToken,
    ) -> FixOutcome {
        let mut manager = BackupManager::new(backups, document_id, text, self.config.dry_run);
        let mut state = RunState {
            stats: BTreeMap::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            iterations: 0,
            committed_passes: 0,
        };

        let mut document = match SourceDocument::parse(document_id, text) {
            Ok(document) => document,
            Err(error) => {
                warn!(document = document_id, %error, "original text does not parse");
                return self.finish(
                    FixStatus::ParseFailure { error },
                    text.to_string(),
                    state,
                    &manager,
                );
            }
        };

        let max_iterations = self.config.max_iterations.max(1);
        let status = loop {
            if state.iterations >= max_iterations {
                warn!(document = document_id, max_iterations, "iteration cap reached");
                break FixStatus::MaxIterationsExceeded;
            }
            if cancel.is_cancelled() {
                break self.cancelled(&state);
            }
            state.iterations += 1;
            let iteration = state.iterations;

            let diagnostics = match analyzer.analyze(&document) {
                Ok(diagnostics) => diagnostics,
                Err(error) => {
                    warn!(document = document_id, iteration, %error, "analyzer failed, rolling back");
                    let reason = match error {
                        AnalyzerError::Timeout { .. } => RollbackReason::AnalyzerTimeout {
                            message: error.to_string(),
                        },
                        other => RollbackReason::Analyzer {
                            message: other.to_string(),
                        },
                    };
                    return self.rolled_back(reason, text, state, &manager);
                }
            };
            if diagnostics.is_empty() {
                info!(document = document_id, iteration, "no diagnostics, converged");
                break FixStatus::Converged;
            }

            if cancel.is_cancelled() {
                break self.cancelled(&state);
            }
            let edits = {
                let mapping =
                    mapper::map(&document, &self.registry, &self.config.rules, diagnostics);
                for skipped in &mapping.skipped {
                    state.stats(&skipped.diagnostic.rule_id).skipped += 1;
                }
                state.skipped.extend(mapping.skipped);

                let mut edits = Vec::new();
                for mapped in &mapping.matched {
                    let ctx = FixContext {
                        document: &document,
                        node: mapped.node,
                        diagnostic: &mapped.diagnostic,
                        offset: mapped.offset,
                    };
                    match engine::apply(mapped.rule, &ctx) {
                        Ok(produced) => edits.extend(produced),
                        Err(error) => {
                            state.stats(&error.rule_id).failed += 1;
                            state.failures.push(RuleFailure {
                                iteration,
                                rule_id: error.rule_id,
                                message: error.kind.to_string(),
                            });
                        }
                    }
                }
                edits
            };

            let plan = schedule(edits);
            for deferred in &plan.deferred {
                state.stats(&deferred.rule_id).deferred += 1;
            }
            if plan.is_empty() {
                info!(document = document_id, iteration, "no applicable edits, converged");
                break FixStatus::Converged;
            }

            if cancel.is_cancelled() {
                break self.cancelled(&state);
            }
            let patched = match patch(&document.text, &plan.applied) {
                Ok(patched) => patched,
                Err(error) => {
                    warn!(document = document_id, iteration, %error, "patch failed, rolling back");
                    let reason = RollbackReason::Patch {
                        message: error.to_string(),
                    };
                    return self.rolled_back(reason, text, state, &manager);
                }
            };

            let tree = match self.validator.validate(&patched.text) {
                Ok(tree) => tree,
                Err(error) => {
                    let location = error.location().clone();
                    let rules = blame(&patched.spans, location.byte_offset);
                    warn!(
                        document = document_id,
                        iteration,
                        %error,
                        rules = ?rules,
                        "patched text failed validation"
                    );
                    for rule in &rules {
                        state.stats(rule).failed += 1;
                    }
                    if state.committed_passes == 0 {
                        let reason = RollbackReason::Validation {
                            rules,
                            message: error.to_string(),
                            location,
                        };
                        return self.rolled_back(reason, text, state, &manager);
                    }
                    break FixStatus::ValidationStopped { iteration, rules };
                }
            };

            if let Err(error) = manager.before_first_edit() {
                warn!(document = document_id, %error, "backup failed, rolling back");
                let reason = RollbackReason::Backup {
                    message: error.to_string(),
                };
                return self.rolled_back(reason, text, state, &manager);
            }

            for edit in &plan.applied {
                debug!(rule = %edit.rule_id, start = edit.start, end = edit.end, "committing edit");
                state.stats(&edit.rule_id).applied += 1;
            }
            info!(
                document = document_id,
                iteration,
                applied = plan.applied.len(),
                deferred = plan.deferred.len(),
                "pass committed"
            );
            document = SourceDocument::from_parts(document_id.to_string(), patched.text, tree);
            state.committed_passes += 1;
        };

        self.finish(status, document.text, state, &manager)
    }

    fn cancelled(&self, state: &RunState) -> FixStatus {
        info!(committed_passes = state.committed_passes, "run cancelled");
        FixStatus::Cancelled {
            committed_passes: state.committed_passes,
        }
    }

    /// Discard every committed pass and return the original text.
    fn rolled_back(
        &self,
        reason: RollbackReason,
        original: &str,
        mut state: RunState,
        manager: &BackupManager<'_>,
    ) -> FixOutcome {
        for stats in state.stats.values_mut() {
            stats.applied = 0;
        }
        state.committed_passes = 0;
        self.finish(
            FixStatus::RolledBack { reason },
            original.to_string(),
            state,
            manager,
        )
    }

    fn finish(
        &self,
        status: FixStatus,
        final_text: String,
        state: RunState,
        manager: &BackupManager<'_>,
    ) -> FixOutcome {
        let report = manager.finalize(&final_text, state.stats);
        info!(
            document = %report.document_id,
            status = status.as_str(),
            iterations = state.iterations,
            committed_passes = state.committed_passes,
            changed = report.changed,
            "run finished"
        );
        FixOutcome {
            document_id: report.document_id.clone(),
            status,
            original_text: manager.original_text().to_string(),
            final_text,
            iterations: state.iterations,
            committed_passes: state.committed_passes,
            report,
            skipped: state.skipped,
            failures: state.failures,
            backup_written: manager.backup_written(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::RuleAnalyzer;
    use crate::backup::MemoryBackupStore;
    use crate::config::RuleFilter;

    fn fixer(max_iterations: usize) -> Fixer {
        Fixer::new(
            Arc::new(RuleRegistry::builtin()),
            FixerConfig {
                max_iterations,
                ..FixerConfig::default()
            },
        )
    }

    fn builtin() -> RuleAnalyzer {
        RuleAnalyzer::new(Arc::new(RuleRegistry::builtin()), RuleFilter::default())
    }

    #[test]
    fn converges_and_backs_up_once() {
        let store = MemoryBackupStore::new();
        let outcome = fixer(10).run(
            "t.ps1",
            "gci | % { $_ }\n",
            &builtin(),
            &store,
            &CancellationToken::new(),
        );
        assert_eq!(outcome.status, FixStatus::Converged);
        assert_eq!(outcome.final_text, "Get-ChildItem | ForEach-Object { $_ }\n");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.committed_passes, 1);
        assert!(outcome.backup_written);
        assert_eq!(store.len(), 1);
        assert_eq!(
            outcome.report.rule_stats["PSAvoidUsingCmdletAliases"].applied,
            2
        );
    }

    #[test]
    fn unparsable_input_is_a_parse_failure() {
        let store = MemoryBackupStore::new();
        let outcome = fixer(10).run(
            "t.ps1",
            "if ($x) {\n",
            &builtin(),
            &store,
            &CancellationToken::new(),
        );
        assert!(matches!(outcome.status, FixStatus::ParseFailure { .. }));
        assert_eq!(outcome.iterations, 0);
        assert!(!outcome.changed());
        assert!(store.is_empty());
    }

    #[test]
    fn cancellation_before_start_changes_nothing() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = fixer(10).run(
            "t.ps1",
            "gci\n",
            &builtin(),
            &MemoryBackupStore::new(),
            &cancel,
        );
        assert_eq!(outcome.status, FixStatus::Cancelled { committed_passes: 0 });
        assert_eq!(outcome.final_text, "gci\n");
    }

    #[test]
    fn iteration_cap_keeps_last_committed_text() {
        let outcome = fixer(1).run(
            "t.ps1",
            "gci\n",
            &builtin(),
            &MemoryBackupStore::new(),
            &CancellationToken::new(),
        );
        assert_eq!(outcome.status, FixStatus::MaxIterationsExceeded);
        assert_eq!(outcome.final_text, "Get-ChildItem\n");
        assert_eq!(outcome.iterations, 1);
    }

    #[test]
    fn status_serializes_with_tag() {
        let json = serde_json::to_value(FixStatus::ValidationStopped {
            iteration: 2,
            rules: vec!["PSX".to_string()],
        })
        .unwrap();
        assert_eq!(json["status"], "validation-stopped");
        assert_eq!(json["iteration"], 2);
    }
}
