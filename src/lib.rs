//! psfix: rule-driven auto-fixer for PowerShell scripts
//!
//! Detects style, security and best-practice violations in `.ps1`, `.psm1`
//! and `.psd1` sources and rewrites the text to resolve them, repeating until
//! nothing is left to fix.
//!
//! # Architecture
//!
//! Every fix compiles down to a single primitive: [`Edit`], a verified
//! byte-span replacement against the current text. Rules only decide *which*
//! spans to replace; scheduling, patching, validation and rollback are shared.
//!
//! # Safety
//!
//! - Every edit verifies its expected before-text
//! - Patched text must re-parse before a pass is committed
//! - The original text is backed up before the first commit
//! - Atomic file writes (tempfile + fsync + rename)
//! - A panicking rule loses its contribution, never the run
//!
//! # Example
//!
//! ```no_run
//! use psfix::analyzer::RuleAnalyzer;
//! use psfix::backup::MemoryBackupStore;
//! use psfix::{CancellationToken, Fixer, FixerConfig, RuleFilter, RuleRegistry};
//! use std::sync::Arc;
//!
//! let registry = Arc::new(RuleRegistry::builtin());
//! let analyzer = RuleAnalyzer::new(registry.clone(), RuleFilter::default());
//! let fixer = Fixer::new(registry, FixerConfig::default());
//!
//! let outcome = fixer.run(
//!     "build.ps1",
//!     "gci | % { $_.Name }\n",
//!     &analyzer,
//!     &MemoryBackupStore::new(),
//!     &CancellationToken::new(),
//! );
//! print!("{}", outcome.report.unified_diff);
//! ```

pub mod analyzer;
pub mod backup;
pub mod batch;
pub mod config;
pub mod diff;
pub mod document;
pub mod edit;
pub mod engine;
pub mod fixer;
pub mod mapper;
pub mod patch;
pub mod ps;
pub mod rules;
pub mod schedule;
pub mod validate;

// Re-exports
pub use analyzer::{Analyzer, AnalyzerError, Diagnostic, Location, Severity};
pub use backup::{BackupError, BackupManager, BackupRecord, BackupStore};
pub use config::{load_from_path, load_from_str, ConfigError, FixerConfig, RuleFilter};
pub use diff::{DiffReport, RuleStats};
pub use document::SourceDocument;
pub use edit::{Edit, EditError, EditVerification};
pub use fixer::{CancellationToken, FixOutcome, FixStatus, Fixer, RollbackReason};
pub use ps::{NodeKind, ParseError, SyntaxNode, SyntaxTree};
pub use rules::{Category, FixRule, RuleRegistry};
pub use validate::{ErrorLocation, ParseValidator, ValidationError};
